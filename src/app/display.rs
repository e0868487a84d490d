use bevy::prelude::*;
use bevy::render::render_resource::Extent3d;
use bevy::window::PrimaryWindow;

use crate::fluid::gpu::GpuFrameOutbox;
use crate::fluid::RenderBackend;

use super::plugin::SplashEffect;

/// Image the fluid renders its drawing buffer into.
#[derive(Resource, Clone)]
pub struct FluidDisplay {
    pub image: Handle<Image>,
}

#[derive(Component)]
pub struct FluidDisplaySprite;

pub fn setup_display(mut commands: Commands, display: Option<Res<FluidDisplay>>) {
    let Some(display) = display else {
        return;
    };
    commands.spawn(Camera2d);
    commands.spawn((Sprite::from_image(display.image.clone()), Transform::from_xyz(0.0, 0.0, -10.0), FluidDisplaySprite));
}

/// Hand this frame's new targets and draws to the renderer and keep the canvas sized
/// to the drawing buffer.
pub fn sync_gpu_frame(
    mut splash: ResMut<SplashEffect>,
    mut images: ResMut<Assets<Image>>,
    mut outbox: ResMut<GpuFrameOutbox>,
) {
    let Some(effect) = splash.effect.as_mut() else {
        outbox.draws.clear();
        return;
    };
    let backend = effect.backend_mut();
    for (handle, image) in backend.take_new_images() {
        images.insert(handle.id(), image);
    }
    let size = backend.drawing_buffer_size();
    // Only touch the canvas on resize; a mutable access re-uploads the texture.
    if images.get(backend.canvas()).is_some_and(|image| image.size() != size) {
        if let Some(image) = images.get_mut(backend.canvas()) {
            image.texture_descriptor.size = Extent3d { width: size.x, height: size.y, depth_or_array_layers: 1 };
        }
    }
    outbox.draws = backend.take_frame();
}

/// Stretch the sprite over the window's logical area.
pub fn fit_display_sprite(
    windows: Query<&Window, With<PrimaryWindow>>,
    mut sprites: Query<&mut Sprite, With<FluidDisplaySprite>>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let size = window.size();
    for mut sprite in &mut sprites {
        if sprite.custom_size != Some(size) {
            sprite.custom_size = Some(size);
        }
    }
}
