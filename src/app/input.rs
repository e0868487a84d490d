use bevy::input::touch::{TouchInput, TouchPhase};
use bevy::prelude::*;
use bevy::window::{CursorMoved, PrimaryWindow};

use crate::fluid::PointerId;

use super::plugin::SplashEffect;

/// Last cursor position in physical pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CursorPosition(pub Option<Vec2>);

/// Translate window input into pointer calls on the effect.
/// Mouse moves are applied before a same-frame press or release.
pub fn forward_pointer_input(
    mut cursor_moved: EventReader<CursorMoved>,
    mut touches: EventReader<TouchInput>,
    buttons: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut cursor: Local<CursorPosition>,
    mut splash: ResMut<SplashEffect>,
) {
    let window = windows.single().ok();
    let scale = window.map(|w| w.scale_factor()).unwrap_or(1.0);
    let Some(effect) = splash.effect.as_mut() else {
        cursor_moved.clear();
        touches.clear();
        return;
    };

    for ev in cursor_moved.read() {
        let position = (ev.position * scale).floor();
        cursor.0 = Some(position);
        effect.pointer_move(PointerId::Mouse, position);
    }
    if buttons.just_pressed(MouseButton::Left) {
        // A press can arrive before any cursor movement was reported.
        let current = window.and_then(|w| w.physical_cursor_position()).map(|p| p.floor());
        if let Some(position) = cursor.0.or(current) {
            if let Err(e) = effect.pointer_down(PointerId::Mouse, position) {
                warn!("click splat failed: {e}");
            }
        }
    }
    if buttons.just_released(MouseButton::Left) {
        effect.pointer_up(PointerId::Mouse);
    }

    for touch in touches.read() {
        let id = PointerId::Touch(touch.id);
        let position = (touch.position * scale).floor();
        match touch.phase {
            TouchPhase::Started => {
                if let Err(e) = effect.pointer_down(id, position) {
                    warn!("touch splat failed: {e}");
                }
            }
            TouchPhase::Moved => effect.pointer_move(id, position),
            TouchPhase::Ended | TouchPhase::Canceled => effect.pointer_up(id),
        }
    }
}

pub fn pause_key_system(keys: Res<ButtonInput<KeyCode>>, mut splash: ResMut<SplashEffect>) {
    if !keys.just_pressed(KeyCode::KeyP) {
        return;
    }
    if let Some(effect) = splash.effect.as_mut() {
        effect.toggle_paused();
    }
}
