//! Shader program registry: compiles the fixed shader set, links one program per
//! fragment shader and caches the uniform locations each pass drives.

use std::collections::HashMap;

use bevy::prelude::*;

use super::backend::{
    Blend, DrawCall, DrawTarget, ProgramId, RenderBackend, ShaderId, ShaderKind, ShaderSource,
    UniformLocation, UniformValue, MANUAL_FILTERING, SHADING,
};
use super::error::FluidError;

/// Compile-time switches of the shader set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Hardware linear filtering is unavailable: advection interpolates by hand.
    pub manual_filtering: bool,
    /// Display shader perturbs colour by a dye-gradient normal.
    pub shading: bool,
}

/// Uniforms the solver sets on each program.
fn driven_uniforms(kind: ShaderKind, options: ProgramOptions) -> Vec<&'static str> {
    match kind {
        ShaderKind::BaseVertex => vec![],
        ShaderKind::Copy => vec!["u_texture"],
        ShaderKind::Clear => vec!["u_texture", "value"],
        ShaderKind::Splat => vec!["u_target", "aspect_ratio", "color", "point", "radius"],
        ShaderKind::Advection => {
            let mut names = vec!["texel_size", "u_velocity", "u_source", "dt", "dissipation"];
            if options.manual_filtering {
                names.push("dye_texel_size");
            }
            names
        }
        ShaderKind::Divergence | ShaderKind::Curl => vec!["texel_size", "u_velocity"],
        ShaderKind::Vorticity => vec!["texel_size", "u_velocity", "u_curl", "curl", "dt"],
        ShaderKind::Pressure => vec!["texel_size", "u_pressure", "u_divergence"],
        ShaderKind::GradientSubtract => vec!["texel_size", "u_pressure", "u_velocity"],
        ShaderKind::Display => {
            if options.shading {
                vec!["u_texture", "texel_size"]
            } else {
                vec!["u_texture"]
            }
        }
    }
}

/// A linked program with its resolved uniform locations.
#[derive(Debug, Clone)]
pub struct Program {
    pub id: ProgramId,
    pub kind: ShaderKind,
    fragment: ShaderId,
    locations: HashMap<&'static str, UniformLocation>,
}

impl Program {
    pub fn location(&self, name: &'static str) -> Result<UniformLocation, FluidError> {
        self.locations
            .get(name)
            .copied()
            .ok_or(FluidError::MissingUniform { program: self.kind, name })
    }

    /// Draw this program over a whole target ("blit").
    pub fn draw<B: RenderBackend + ?Sized>(
        &self,
        backend: &mut B,
        target: DrawTarget,
        values: &[(&'static str, UniformValue)],
        blend: Blend,
        clear: Option<Vec4>,
    ) -> Result<(), FluidError> {
        let mut uniforms = Vec::with_capacity(values.len());
        for (name, value) in values {
            uniforms.push((self.location(name)?, *value));
        }
        backend.draw(&DrawCall { program: self.id, target, uniforms: &uniforms, blend, clear })
    }
}

/// All programs of the effect plus the shaders they were linked from.
#[derive(Debug, Clone)]
pub struct ProgramRegistry {
    pub options: ProgramOptions,
    vertex: ShaderId,
    pub copy: Program,
    pub clear: Program,
    pub splat: Program,
    pub advection: Program,
    pub divergence: Program,
    pub curl: Program,
    pub vorticity: Program,
    pub pressure: Program,
    pub gradient_subtract: Program,
    pub display: Program,
}

fn shader_source(kind: ShaderKind, options: ProgramOptions) -> ShaderSource {
    let source = ShaderSource::new(kind);
    match kind {
        ShaderKind::Advection if options.manual_filtering => source.with_keyword(MANUAL_FILTERING),
        ShaderKind::Display if options.shading => source.with_keyword(SHADING),
        _ => source,
    }
}

/// Partially built registry; released wholesale when a later step fails.
#[derive(Default)]
struct Built {
    shaders: Vec<ShaderId>,
    programs: Vec<Program>,
}

impl Built {
    fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        for program in self.programs {
            backend.release_program(program.id);
        }
        for shader in self.shaders {
            backend.release_shader(shader);
        }
    }
}

fn resolve_locations<B: RenderBackend + ?Sized>(
    backend: &B,
    id: ProgramId,
    kind: ShaderKind,
    options: ProgramOptions,
) -> Result<HashMap<&'static str, UniformLocation>, FluidError> {
    let active = backend.active_uniforms(id)?;
    let mut locations = HashMap::new();
    for name in driven_uniforms(kind, options) {
        let location = active
            .iter()
            .find(|(active_name, _)| active_name == name)
            .map(|(_, loc)| *loc)
            .ok_or(FluidError::MissingUniform { program: kind, name })?;
        locations.insert(name, location);
    }
    Ok(locations)
}

fn link<B: RenderBackend + ?Sized>(
    backend: &mut B,
    vertex: ShaderId,
    kind: ShaderKind,
    options: ProgramOptions,
    built: &mut Built,
) -> Result<(), FluidError> {
    let fragment = backend.compile_shader(&shader_source(kind, options))?;
    built.shaders.push(fragment);
    let id = backend.link_program(vertex, fragment)?;
    let locations = match resolve_locations(backend, id, kind, options) {
        Ok(locations) => locations,
        Err(e) => {
            backend.release_program(id);
            return Err(e);
        }
    };
    built.programs.push(Program { id, kind, fragment, locations });
    Ok(())
}

impl ProgramRegistry {
    /// Compile and link the full shader set. Any failure releases what was created
    /// and is reported as one error.
    pub fn build<B: RenderBackend + ?Sized>(backend: &mut B, options: ProgramOptions) -> Result<Self, FluidError> {
        let mut built = Built::default();
        let result = Self::build_into(backend, options, &mut built);
        match result {
            Ok(vertex) => {
                let registry = Self::assemble(backend, options, vertex, built)?;
                info!(target: "fluid::programs", "compiled {} programs (manual_filtering={}, shading={})",
                    ShaderKind::FRAGMENTS.len(), options.manual_filtering, options.shading);
                Ok(registry)
            }
            Err(e) => {
                debug!(target: "fluid::programs", "releasing partial shader set after: {e}");
                built.release(backend);
                Err(e)
            }
        }
    }

    /// Move linked programs into their slots, in [`ShaderKind::FRAGMENTS`] order.
    fn assemble<B: RenderBackend + ?Sized>(
        backend: &mut B,
        options: ProgramOptions,
        vertex: ShaderId,
        built: Built,
    ) -> Result<Self, FluidError> {
        let Built { shaders, programs } = built;
        let programs: [Program; 10] = match programs.try_into() {
            Ok(programs) => programs,
            Err(programs) => {
                let found = programs.len();
                Built { shaders, programs }.release(backend);
                return Err(FluidError::ProgramLink {
                    program: ShaderKind::BaseVertex,
                    log: format!("expected {} programs, linked {found}", ShaderKind::FRAGMENTS.len()),
                });
            }
        };
        let [copy, clear, splat, advection, divergence, curl, vorticity, pressure, gradient_subtract, display] =
            programs;
        Ok(Self {
            options,
            vertex,
            copy,
            clear,
            splat,
            advection,
            divergence,
            curl,
            vorticity,
            pressure,
            gradient_subtract,
            display,
        })
    }

    fn build_into<B: RenderBackend + ?Sized>(
        backend: &mut B,
        options: ProgramOptions,
        built: &mut Built,
    ) -> Result<ShaderId, FluidError> {
        let vertex = backend.compile_shader(&ShaderSource::new(ShaderKind::BaseVertex))?;
        built.shaders.push(vertex);
        for kind in ShaderKind::FRAGMENTS {
            link(backend, vertex, kind, options, built)?;
        }
        Ok(vertex)
    }

    pub fn programs(&self) -> [&Program; 10] {
        [
            &self.copy,
            &self.clear,
            &self.splat,
            &self.advection,
            &self.divergence,
            &self.curl,
            &self.vorticity,
            &self.pressure,
            &self.gradient_subtract,
            &self.display,
        ]
    }

    /// Delete every program and shader.
    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        let mut built = Built { shaders: vec![self.vertex], programs: Vec::new() };
        for program in self.programs() {
            built.shaders.push(program.fragment);
            built.programs.push(program.clone());
        }
        built.release(backend);
    }
}
