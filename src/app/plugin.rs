use bevy::prelude::*;
use bevy::render::renderer::RenderDevice;
use bevy::window::PrimaryWindow;

use crate::core::config::SplashConfig;
use crate::debug::DebugPlugin;
use crate::fluid::gpu::{canvas_image, gpu_capabilities, FluidRenderPlugin};
use crate::fluid::{FluidEffect, FrameOutcome, GpuBackend, RenderBackend};

use super::capture::{capture_key_system, CaptureSettings};
use super::display::{fit_display_sprite, setup_display, sync_gpu_frame, FluidDisplay};
use super::input::{forward_pointer_input, pause_key_system};

/// Frame phases: input is forwarded before the effect ticks, so pointer state is
/// never mutated while a frame consumes it.
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub struct SplashInputSet;

#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub struct SplashFrameSet;

/// The effect, or `None` when it failed to initialize (or was torn down).
#[derive(Resource, Default)]
pub struct SplashEffect {
    pub effect: Option<FluidEffect<GpuBackend>>,
}

impl SplashEffect {
    pub fn new(effect: FluidEffect<GpuBackend>) -> Self {
        Self { effect: Some(effect) }
    }
}

/// Running counters of the frame loop.
#[derive(Resource, Debug, Clone, Default, PartialEq)]
pub struct FluidFrameStats {
    pub frames: u64,
    pub splats: u64,
    pub last: FrameOutcome,
}

pub struct SplashCursorPlugin;

impl Plugin for SplashCursorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<SplashConfig>()
            .init_resource::<SplashEffect>()
            .init_resource::<FluidFrameStats>()
            .init_resource::<CaptureSettings>()
            .configure_sets(Update, (SplashInputSet, SplashFrameSet.after(SplashInputSet)))
            .add_systems(Startup, (setup_effect, setup_display).chain())
            .add_systems(
                Update,
                (forward_pointer_input, pause_key_system, capture_key_system).in_set(SplashInputSet),
            )
            .add_systems(
                Update,
                (advance_frame, sync_gpu_frame, fit_display_sprite)
                    .chain()
                    .in_set(SplashFrameSet),
            )
            .add_systems(Last, shutdown_on_exit)
            .add_plugins((FluidRenderPlugin, DebugPlugin));
    }
}

/// Physical size of the primary window, or `fallback` when running headless.
pub fn canvas_size(windows: &Query<&Window, With<PrimaryWindow>>, fallback: UVec2) -> UVec2 {
    windows.single().map(|w| w.physical_size()).unwrap_or(fallback)
}

pub fn setup_effect(
    mut commands: Commands,
    cfg: Res<SplashConfig>,
    windows: Query<&Window, With<PrimaryWindow>>,
    render_device: Option<Res<RenderDevice>>,
    mut images: ResMut<Assets<Image>>,
) {
    let Some(render_device) = render_device else {
        error!("splash cursor disabled: no render device");
        return;
    };
    let fallback = UVec2::new(cfg.window.width.max(1.0) as u32, cfg.window.height.max(1.0) as u32);
    let canvas = canvas_size(&windows, fallback);
    let image = images.add(canvas_image(canvas));
    let capabilities = gpu_capabilities(render_device.features());
    let backend = GpuBackend::new(image.clone(), canvas, images.get_handle_provider(), capabilities);
    commands.insert_resource(FluidDisplay { image });
    match FluidEffect::new(backend, cfg.fluid.clone()) {
        Ok(effect) => commands.insert_resource(SplashEffect::new(effect)),
        Err(e) => {
            error!("splash cursor disabled: {e}");
            commands.insert_resource(SplashEffect::default());
        }
    }
}

pub fn advance_frame(
    time: Res<Time>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut splash: ResMut<SplashEffect>,
    mut stats: ResMut<FluidFrameStats>,
) {
    let Some(effect) = splash.effect.as_mut() else {
        return;
    };
    let current = effect.backend().drawing_buffer_size();
    let canvas = canvas_size(&windows, current);
    match effect.tick(time.elapsed_secs_f64(), canvas) {
        Ok(outcome) => {
            if outcome.ran {
                stats.frames += 1;
                stats.splats += outcome.splats as u64;
            }
            stats.last = outcome;
        }
        Err(e) => {
            error!("splash cursor stopped: {e}");
            splash.effect = None;
        }
    }
}

pub fn shutdown_on_exit(mut exit: EventReader<AppExit>, mut splash: ResMut<SplashEffect>) {
    if exit.read().next().is_some() {
        if let Some(mut effect) = splash.effect.take() {
            effect.shutdown();
        }
    }
}
