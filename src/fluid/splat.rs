//! Splat injection: a Gaussian blob of force into velocity and of colour into dye.

use bevy::prelude::*;
use rand::Rng;

use super::backend::{Blend, RenderBackend, UniformValue};
use super::error::FluidError;
use super::pointer::PendingSplat;
use super::programs::ProgramRegistry;
use super::stepper::Fields;
use super::targets::DoubleTarget;

/// Splat radius in the shader's units: landscape canvases widen it by the aspect ratio.
pub fn correct_radius(radius: f32, aspect: f32) -> f32 {
    if aspect > 1.0 {
        radius * aspect
    } else {
        radius
    }
}

/// Per-splat parameters derived from config and canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatParams {
    pub aspect: f32,
    /// Already passed through [`correct_radius`].
    pub radius: f32,
}

impl SplatParams {
    /// `splat_radius` is the user-facing value (hundredths of the shader radius).
    pub fn new(splat_radius: f32, aspect: f32) -> Self {
        Self { aspect, radius: correct_radius(splat_radius / 100.0, aspect) }
    }
}

fn splat_into<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    field: &mut DoubleTarget,
    params: &SplatParams,
    point: Vec2,
    color: Vec3,
) -> Result<(), FluidError> {
    programs.splat.draw(
        backend,
        field.write().as_draw_target(),
        &[
            ("u_target", field.read().sampler()),
            ("aspect_ratio", UniformValue::Float(params.aspect)),
            ("point", UniformValue::Vec2(point)),
            ("color", UniformValue::Vec3(color)),
            ("radius", UniformValue::Float(params.radius)),
        ],
        Blend::Disabled,
        None,
    )?;
    field.swap();
    Ok(())
}

/// Add `force` to velocity and `color` to dye around `point` (texture coordinates).
pub fn splat<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    params: &SplatParams,
    point: Vec2,
    force: Vec2,
    color: Vec3,
) -> Result<(), FluidError> {
    splat_into(backend, programs, &mut fields.velocity, params, point, force.extend(0.0))?;
    splat_into(backend, programs, &mut fields.dye, params, point, color)
}

/// Splat owed by a moved pointer.
pub fn splat_pointer<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    params: &SplatParams,
    pending: &PendingSplat,
    splat_force: f32,
) -> Result<(), FluidError> {
    splat(backend, programs, fields, params, pending.point, pending.delta * splat_force, pending.color)
}

/// Random-direction burst fired on press.
pub fn click_force<R: Rng + ?Sized>(impulse: f32, rng: &mut R) -> Vec2 {
    Vec2::new(impulse * (rng.gen::<f32>() - 0.5), impulse * (rng.gen::<f32>() - 0.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn portrait_radius_is_unchanged() {
        assert_eq!(correct_radius(0.003, 0.5), 0.003);
    }

    #[test]
    fn landscape_radius_scales_with_aspect() {
        let params = SplatParams::new(0.3, 2.0);
        assert!((params.radius - 0.006).abs() < 1e-7);
    }

    #[test]
    fn click_force_is_bounded_by_half_the_impulse() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let f = click_force(100.0, &mut rng);
            assert!(f.x.abs() <= 50.0 && f.y.abs() <= 50.0);
        }
    }
}
