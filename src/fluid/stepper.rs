//! Fields of the simulation and the fixed per-frame solver pipeline.
//!
//! Order per step (blending disabled throughout):
//! curl -> vorticity confinement -> divergence -> pressure damping -> Jacobi
//! iterations -> gradient subtraction -> velocity self-advection -> dye advection.

use bevy::prelude::*;

use super::backend::{Blend, Filtering, RenderBackend, TargetDesc, TextureFormat, UniformValue};
use super::error::FluidError;
use super::formats::SupportedFormats;
use super::programs::ProgramRegistry;
use super::targets::{resize_double, resize_target, DoubleTarget, RenderTarget};

/// Components of velocity are clamped to this range after vorticity confinement.
pub const VELOCITY_LIMIT: f32 = 1000.0;

/// Exponential-style decay used by both advection passes.
pub fn dissipate(value: f32, rate: f32, dt: f32) -> f32 {
    value / (1.0 + rate * dt)
}

/// Sizes and formats of every field for one drawing-buffer size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldLayout {
    pub sim: UVec2,
    pub dye: UVec2,
    pub formats: SupportedFormats,
    /// Filtering for velocity and dye (linear when the platform supports it).
    pub filtering: Filtering,
}

impl FieldLayout {
    fn desc(size: UVec2, format: TextureFormat, filtering: Filtering) -> TargetDesc {
        TargetDesc { width: size.x, height: size.y, format, filtering }
    }

    pub fn velocity(&self) -> TargetDesc {
        Self::desc(self.sim, self.formats.rg, self.filtering)
    }

    pub fn dye(&self) -> TargetDesc {
        Self::desc(self.dye, self.formats.rgba, self.filtering)
    }

    pub fn scalar(&self) -> TargetDesc {
        Self::desc(self.sim, self.formats.r, Filtering::Nearest)
    }
}

/// All render targets the solver evolves.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields {
    pub velocity: DoubleTarget,
    pub dye: DoubleTarget,
    pub pressure: DoubleTarget,
    pub divergence: RenderTarget,
    pub curl: RenderTarget,
}

impl Fields {
    pub fn allocate<B: RenderBackend + ?Sized>(backend: &mut B, layout: &FieldLayout) -> Result<Self, FluidError> {
        let velocity = DoubleTarget::create(backend, layout.velocity())?;
        let dye = match DoubleTarget::create(backend, layout.dye()) {
            Ok(dye) => dye,
            Err(e) => {
                velocity.release(backend);
                return Err(e);
            }
        };
        let pressure = match DoubleTarget::create(backend, layout.scalar()) {
            Ok(pressure) => pressure,
            Err(e) => {
                velocity.release(backend);
                dye.release(backend);
                return Err(e);
            }
        };
        let divergence = match RenderTarget::create(backend, layout.scalar()) {
            Ok(divergence) => divergence,
            Err(e) => {
                velocity.release(backend);
                dye.release(backend);
                pressure.release(backend);
                return Err(e);
            }
        };
        let curl = match RenderTarget::create(backend, layout.scalar()) {
            Ok(curl) => curl,
            Err(e) => {
                velocity.release(backend);
                dye.release(backend);
                pressure.release(backend);
                divergence.release(backend);
                return Err(e);
            }
        };
        info!(
            target: "fluid::stepper",
            "fields allocated sim={}x{} dye={}x{}",
            layout.sim.x, layout.sim.y, layout.dye.x, layout.dye.y
        );
        Ok(Self { velocity, dye, pressure, divergence, curl })
    }

    /// Bring every field to `layout`, carrying evolving fields forward.
    /// Returns whether anything was recreated.
    pub fn resize<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        programs: &ProgramRegistry,
        layout: &FieldLayout,
    ) -> Result<bool, FluidError> {
        let mut changed = resize_double(backend, &programs.copy, &mut self.dye, layout.dye())?;
        changed |= resize_double(backend, &programs.copy, &mut self.velocity, layout.velocity())?;
        changed |= resize_double(backend, &programs.copy, &mut self.pressure, layout.scalar())?;
        changed |= resize_target(backend, &mut self.divergence, layout.scalar())?;
        changed |= resize_target(backend, &mut self.curl, layout.scalar())?;
        Ok(changed)
    }

    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        self.velocity.release(backend);
        self.dye.release(backend);
        self.pressure.release(backend);
        self.divergence.release(backend);
        self.curl.release(backend);
    }
}

/// Numeric inputs of one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub dt: f32,
    /// Vorticity confinement strength.
    pub curl: f32,
    /// Warm-start damping applied to last frame's pressure.
    pub pressure: f32,
    pub pressure_iterations: u32,
    pub velocity_dissipation: f32,
    pub density_dissipation: f32,
}

pub fn compute_curl<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
) -> Result<(), FluidError> {
    programs.curl.draw(
        backend,
        fields.curl.as_draw_target(),
        &[
            ("texel_size", UniformValue::Vec2(fields.velocity.texel_size())),
            ("u_velocity", fields.velocity.read().sampler()),
        ],
        Blend::Disabled,
        None,
    )
}

pub fn apply_vorticity<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    curl: f32,
    dt: f32,
) -> Result<(), FluidError> {
    programs.vorticity.draw(
        backend,
        fields.velocity.write().as_draw_target(),
        &[
            ("texel_size", UniformValue::Vec2(fields.velocity.texel_size())),
            ("u_velocity", fields.velocity.read().sampler()),
            ("u_curl", fields.curl.sampler()),
            ("curl", UniformValue::Float(curl)),
            ("dt", UniformValue::Float(dt)),
        ],
        Blend::Disabled,
        None,
    )?;
    fields.velocity.swap();
    Ok(())
}

pub fn compute_divergence<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
) -> Result<(), FluidError> {
    programs.divergence.draw(
        backend,
        fields.divergence.as_draw_target(),
        &[
            ("texel_size", UniformValue::Vec2(fields.velocity.texel_size())),
            ("u_velocity", fields.velocity.read().sampler()),
        ],
        Blend::Disabled,
        None,
    )
}

/// Scale last frame's pressure instead of clearing it.
pub fn damp_pressure<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    damping: f32,
) -> Result<(), FluidError> {
    programs.clear.draw(
        backend,
        fields.pressure.write().as_draw_target(),
        &[
            ("u_texture", fields.pressure.read().sampler()),
            ("value", UniformValue::Float(damping)),
        ],
        Blend::Disabled,
        None,
    )?;
    fields.pressure.swap();
    Ok(())
}

/// Jacobi relaxation of the pressure Poisson equation, swapping after every pass.
pub fn solve_pressure<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    iterations: u32,
) -> Result<(), FluidError> {
    let texel_size = UniformValue::Vec2(fields.velocity.texel_size());
    for _ in 0..iterations {
        programs.pressure.draw(
            backend,
            fields.pressure.write().as_draw_target(),
            &[
                ("texel_size", texel_size),
                ("u_divergence", fields.divergence.sampler()),
                ("u_pressure", fields.pressure.read().sampler()),
            ],
            Blend::Disabled,
            None,
        )?;
        fields.pressure.swap();
    }
    Ok(())
}

pub fn subtract_gradient<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
) -> Result<(), FluidError> {
    programs.gradient_subtract.draw(
        backend,
        fields.velocity.write().as_draw_target(),
        &[
            ("texel_size", UniformValue::Vec2(fields.velocity.texel_size())),
            ("u_pressure", fields.pressure.read().sampler()),
            ("u_velocity", fields.velocity.read().sampler()),
        ],
        Blend::Disabled,
        None,
    )?;
    fields.velocity.swap();
    Ok(())
}

fn advect<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    velocity: &RenderTarget,
    source: &DoubleTarget,
    dt: f32,
    dissipation: f32,
) -> Result<(), FluidError> {
    let mut values = vec![
        ("texel_size", UniformValue::Vec2(velocity.texel_size())),
        ("u_velocity", velocity.sampler()),
        ("u_source", source.read().sampler()),
        ("dt", UniformValue::Float(dt)),
        ("dissipation", UniformValue::Float(dissipation)),
    ];
    if programs.options.manual_filtering {
        values.push(("dye_texel_size", UniformValue::Vec2(source.texel_size())));
    }
    programs
        .advection
        .draw(backend, source.write().as_draw_target(), &values, Blend::Disabled, None)
}

pub fn advect_velocity<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    dt: f32,
    dissipation: f32,
) -> Result<(), FluidError> {
    let velocity = *fields.velocity.read();
    advect(backend, programs, &velocity, &fields.velocity, dt, dissipation)?;
    fields.velocity.swap();
    Ok(())
}

pub fn advect_dye<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    dt: f32,
    dissipation: f32,
) -> Result<(), FluidError> {
    let velocity = *fields.velocity.read();
    advect(backend, programs, &velocity, &fields.dye, dt, dissipation)?;
    fields.dye.swap();
    Ok(())
}

/// Advance velocity and dye by one time step.
pub fn step<B: RenderBackend + ?Sized>(
    backend: &mut B,
    programs: &ProgramRegistry,
    fields: &mut Fields,
    params: &StepParams,
) -> Result<(), FluidError> {
    compute_curl(backend, programs, fields)?;
    apply_vorticity(backend, programs, fields, params.curl, params.dt)?;
    compute_divergence(backend, programs, fields)?;
    damp_pressure(backend, programs, fields, params.pressure)?;
    solve_pressure(backend, programs, fields, params.pressure_iterations)?;
    subtract_gradient(backend, programs, fields)?;
    advect_velocity(backend, programs, fields, params.dt, params.velocity_dissipation)?;
    advect_dye(backend, programs, fields, params.dt, params.density_dissipation)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_never_decays() {
        assert_eq!(dissipate(3.0, 0.0, 10.0), 3.0);
    }

    #[test]
    fn tiny_steps_approach_no_decay() {
        let mut v = 1.0f32;
        for _ in 0..1000 {
            v = dissipate(v, 1.0, 1e-7);
        }
        assert!((v - 1.0).abs() < 1e-3, "v={v}");
    }

    #[test]
    fn refined_steps_approach_exponential() {
        let (rate, total) = (0.5f32, 2.0f32);
        let n = 2000;
        let mut v = 1.0f32;
        for _ in 0..n {
            v = dissipate(v, rate, total / n as f32);
        }
        assert!((v - (-rate * total).exp()).abs() < 1e-3, "v={v}");
    }
}
