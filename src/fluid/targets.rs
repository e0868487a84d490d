//! Render targets and the ping-pong double buffer.

use bevy::prelude::*;

use super::backend::{Blend, DrawTarget, RenderBackend, TargetDesc, TargetId, UniformValue};
use super::error::FluidError;
use super::programs::Program;

/// A texture + framebuffer pair owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub id: TargetId,
    pub desc: TargetDesc,
}

impl RenderTarget {
    pub fn create<B: RenderBackend + ?Sized>(backend: &mut B, desc: TargetDesc) -> Result<Self, FluidError> {
        let id = backend.create_target(&desc)?;
        Ok(Self { id, desc })
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        backend.release_target(self.id);
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn size(&self) -> UVec2 {
        self.desc.size()
    }

    pub fn texel_size(&self) -> Vec2 {
        Vec2::new(1.0 / self.desc.width as f32, 1.0 / self.desc.height as f32)
    }

    /// Uniform value binding this target for sampling.
    pub fn sampler(&self) -> UniformValue {
        UniformValue::Texture(self.id)
    }

    pub fn as_draw_target(&self) -> DrawTarget {
        DrawTarget::Target(self.id)
    }
}

/// Two buffers alternated between "read" and "write"; `swap` flips an index.
#[derive(Debug, Clone, PartialEq)]
pub struct PingPong<T> {
    slots: [T; 2],
    read: usize,
}

impl<T> PingPong<T> {
    pub fn new(read: T, write: T) -> Self {
        Self { slots: [read, write], read: 0 }
    }

    pub fn read(&self) -> &T {
        &self.slots[self.read]
    }

    pub fn write(&self) -> &T {
        &self.slots[self.read ^ 1]
    }

    pub fn swap(&mut self) {
        self.read ^= 1;
    }

    pub fn into_slots(self) -> [T; 2] {
        self.slots
    }
}

pub type DoubleTarget = PingPong<RenderTarget>;

impl PingPong<RenderTarget> {
    pub fn create<B: RenderBackend + ?Sized>(backend: &mut B, desc: TargetDesc) -> Result<Self, FluidError> {
        let first = RenderTarget::create(backend, desc)?;
        match RenderTarget::create(backend, desc) {
            Ok(second) => Ok(Self::new(first, second)),
            Err(e) => {
                first.release(backend);
                Err(e)
            }
        }
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        for target in self.into_slots() {
            target.release(backend);
        }
    }

    pub fn desc(&self) -> TargetDesc {
        self.read().desc
    }

    pub fn size(&self) -> UVec2 {
        self.read().size()
    }

    pub fn texel_size(&self) -> Vec2 {
        self.read().texel_size()
    }
}

/// Recreate a single target when its description changed. Returns whether it did;
/// on error the old target is left in place.
pub fn resize_target<B: RenderBackend + ?Sized>(
    backend: &mut B,
    target: &mut RenderTarget,
    desc: TargetDesc,
) -> Result<bool, FluidError> {
    if target.desc == desc {
        return Ok(false);
    }
    let fresh = RenderTarget::create(backend, desc)?;
    std::mem::replace(target, fresh).release(backend);
    Ok(true)
}

/// Recreate a double buffer at a new size, carrying the current field forward with
/// the copy program. Same-size requests are a no-op; on error the old buffers stay.
pub fn resize_double<B: RenderBackend + ?Sized>(
    backend: &mut B,
    copy: &Program,
    double: &mut DoubleTarget,
    desc: TargetDesc,
) -> Result<bool, FluidError> {
    let old_desc = double.desc();
    if old_desc == desc {
        return Ok(false);
    }
    let fresh = DoubleTarget::create(backend, desc)?;
    let carried = copy.draw(
        backend,
        fresh.read().as_draw_target(),
        &[("u_texture", double.read().sampler())],
        Blend::Disabled,
        None,
    );
    if let Err(e) = carried {
        warn!(target: "fluid::targets", "field copy on resize failed, starting empty: {e}");
    }
    debug!(
        target: "fluid::targets",
        "double buffer resized {}x{} -> {}x{}",
        old_desc.width, old_desc.height, desc.width, desc.height
    );
    std::mem::replace(double, fresh).release(backend);
    Ok(true)
}

/// Aspect-aware grid size: the smaller side gets `resolution` cells and the larger
/// side follows the drawing buffer's larger side.
pub fn grid_resolution(resolution: u32, drawing: UVec2) -> UVec2 {
    let mut aspect = if drawing.x == 0 || drawing.y == 0 {
        1.0
    } else {
        drawing.x as f32 / drawing.y as f32
    };
    if aspect < 1.0 {
        aspect = 1.0 / aspect;
    }
    let min = (resolution as f32).round().max(1.0) as u32;
    let max = (resolution as f32 * aspect).round().max(1.0) as u32;
    if drawing.x > drawing.y {
        UVec2::new(max, min)
    } else {
        UVec2::new(min, max)
    }
}
