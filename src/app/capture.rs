use std::fs;
use std::path::{Path, PathBuf};

use bevy::prelude::*;
use bevy::render::gpu_readback::{Readback, ReadbackComplete};

use crate::fluid::gpu::readback_to_image;
use crate::fluid::{CapturedImage, FluidError};

use super::plugin::SplashEffect;

#[derive(Resource, Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub directory: PathBuf,
    /// Index of the next capture file.
    pub next_index: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { directory: PathBuf::from("captures"), next_index: 0 }
    }
}

pub fn capture_path(directory: &Path, index: u32) -> PathBuf {
    directory.join(format!("splash-{index:04}.png"))
}

/// Encode a capture as PNG at `path`, creating parent directories.
pub fn write_png(path: &Path, capture: &CapturedImage) -> Result<(), FluidError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FluidError::Capture(format!("{}: {e}", parent.display())))?;
    }
    image::save_buffer(path, &capture.rgba, capture.width, capture.height, image::ExtendedColorType::Rgba8)
        .map_err(|e| FluidError::Capture(format!("{}: {e}", path.display())))
}

/// A capture whose pixels are on their way back from the GPU.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct PendingCapture {
    pub path: PathBuf,
    pub size: UVec2,
}

/// F12 renders the dye offscreen and writes it to the next numbered PNG once read back.
pub fn capture_key_system(
    mut commands: Commands,
    keys: Res<ButtonInput<KeyCode>>,
    mut settings: ResMut<CaptureSettings>,
    mut splash: ResMut<SplashEffect>,
) {
    if !keys.just_pressed(KeyCode::F12) {
        return;
    }
    let Some(effect) = splash.effect.as_mut() else {
        return;
    };
    let exported = effect.render_capture(|backend, target| {
        backend
            .target_image(target)
            .cloned()
            .ok_or_else(|| FluidError::Capture(format!("{target:?} has no image")))
    });
    match exported {
        Ok((image, size)) => {
            let path = capture_path(&settings.directory, settings.next_index);
            settings.next_index += 1;
            info!("capture of {}x{} queued for {}", size.x, size.y, path.display());
            commands.spawn((Readback::texture(image), PendingCapture { path, size })).observe(save_capture);
        }
        Err(e) => warn!("capture failed: {e}"),
    }
}

/// Write a finished readback to its PNG and stop reading the texture back.
pub fn save_capture(trigger: Trigger<ReadbackComplete>, captures: Query<&PendingCapture>, mut commands: Commands) {
    let entity = trigger.target();
    let Ok(pending) = captures.get(entity) else {
        return;
    };
    match readback_to_image(&trigger.event().0, pending.size).and_then(|capture| write_png(&pending.path, &capture)) {
        Ok(()) => info!("capture written to {}", pending.path.display()),
        Err(e) => warn!("capture failed: {e}"),
    }
    commands.entity(entity).despawn();
}
