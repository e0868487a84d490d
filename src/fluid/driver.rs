//! Frame driver: the simulation context object and its per-frame sequence.

use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use super::backend::{DrawTarget, Filtering, RenderBackend, TargetId};
use super::color::{generate_color, ColorCycle};
use super::error::FluidError;
use super::formats::SupportedFormats;
use super::pointer::{aspect_ratio, PointerId, PointerSet};
use super::programs::{ProgramOptions, ProgramRegistry};
use super::render::{self, CapturedImage, DisplayParams};
use super::splat::{self, click_force, SplatParams};
use super::stepper::{self, FieldLayout, Fields, StepParams};
use super::targets::grid_resolution;
use crate::core::config::FluidConfig;

/// When the frame loop begins running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum StartMode {
    #[default]
    Eager,
    /// Wait for the first pointer press or move.
    OnInteraction,
}

/// Wall-clock to step-size conversion. The first tick after a (re)start yields 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    last: Option<f64>,
    max_dt: f32,
}

impl FrameClock {
    pub fn new(max_dt: f32) -> Self {
        Self { last: None, max_dt }
    }

    /// Seconds since the previous tick, clamped to `[0, max_dt]`.
    pub fn tick(&mut self, now: f64) -> f32 {
        let dt = match self.last {
            Some(last) => ((now - last) as f32).clamp(0.0, self.max_dt.max(0.0)),
            None => 0.0,
        };
        self.last = Some(now);
        dt
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// What one call to [`FluidEffect::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameOutcome {
    /// False when the loop is stopped or the effect was shut down.
    pub ran: bool,
    pub dt: f32,
    pub resized: bool,
    pub splats: usize,
    pub stepped: bool,
}

struct GpuState {
    programs: ProgramRegistry,
    fields: Fields,
    formats: SupportedFormats,
    filtering: Filtering,
}

/// A running splash-cursor effect over a render backend.
pub struct FluidEffect<B: RenderBackend> {
    backend: B,
    config: FluidConfig,
    gpu: Option<GpuState>,
    pointers: PointerSet,
    colors: ColorCycle,
    clock: FrameClock,
    rng: StdRng,
    running: bool,
    paused: bool,
}

impl<B: RenderBackend> FluidEffect<B> {
    /// Build programs and fields for the backend's current drawing buffer.
    /// Nothing stays allocated when this fails.
    pub fn new(mut backend: B, config: FluidConfig) -> Result<Self, FluidError> {
        let canvas = backend.drawing_buffer_size();
        if canvas.x == 0 || canvas.y == 0 {
            return Err(FluidError::ContextUnavailable(format!(
                "drawing buffer is {}x{}",
                canvas.x, canvas.y
            )));
        }
        let capabilities = backend.capabilities();
        let config = config.degraded(capabilities);
        if !capabilities.linear_filtering {
            warn!(
                target: "fluid::driver",
                "linear filtering unavailable: dye resolution {} and shading off", config.dye_resolution
            );
        }
        let formats = SupportedFormats::resolve(&mut backend);
        let filtering = if capabilities.linear_filtering { Filtering::Linear } else { Filtering::Nearest };
        let options = ProgramOptions { manual_filtering: !capabilities.linear_filtering, shading: config.shading };
        let programs = ProgramRegistry::build(&mut backend, options)?;
        let layout = field_layout(&config, formats, filtering, canvas);
        let fields = match Fields::allocate(&mut backend, &layout) {
            Ok(fields) => fields,
            Err(e) => {
                programs.release(&mut backend);
                return Err(e);
            }
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        info!(
            target: "fluid::driver",
            "fluid effect ready canvas={}x{} sim={}x{} dye={}x{}",
            canvas.x, canvas.y, layout.sim.x, layout.sim.y, layout.dye.x, layout.dye.y
        );
        Ok(Self {
            colors: ColorCycle::new(config.color_update_speed),
            clock: FrameClock::new(config.max_frame_dt),
            running: config.start_mode == StartMode::Eager,
            paused: config.paused,
            backend,
            config,
            gpu: Some(GpuState { programs, fields, formats, filtering }),
            pointers: PointerSet::default(),
            rng,
        })
    }

    /// The effective configuration (after platform degradation).
    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn fields(&self) -> Option<&Fields> {
        self.gpu.as_ref().map(|gpu| &gpu.fields)
    }

    pub fn programs(&self) -> Option<&ProgramRegistry> {
        self.gpu.as_ref().map(|gpu| &gpu.programs)
    }

    pub fn pointers(&self) -> &PointerSet {
        &self.pointers
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_shut_down(&self) -> bool {
        self.gpu.is_none()
    }

    pub fn start(&mut self) {
        if !self.running && self.gpu.is_some() {
            self.running = true;
            self.clock.reset();
            debug!(target: "fluid::driver", "frame loop started");
        }
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            debug!(target: "fluid::driver", "frame loop stopped");
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            self.paused = paused;
            info!(target: "fluid::driver", "simulation {}", if paused { "paused" } else { "resumed" });
        }
    }

    pub fn toggle_paused(&mut self) -> bool {
        self.set_paused(!self.paused);
        self.paused
    }

    fn canvas(&self) -> UVec2 {
        self.backend.drawing_buffer_size()
    }

    fn splat_params(&self) -> SplatParams {
        SplatParams::new(self.config.splat_radius, aspect_ratio(self.canvas()))
    }

    fn display_params(&self) -> DisplayParams {
        DisplayParams {
            back_color: self.config.back_color(),
            transparent: self.config.transparent,
            paused: self.paused,
        }
    }

    /// Inject a splat directly (texture coordinates, force in velocity units).
    pub fn splat(&mut self, point: Vec2, force: Vec2, color: Vec3) -> Result<(), FluidError> {
        let params = self.splat_params();
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        splat::splat(&mut self.backend, &gpu.programs, &mut gpu.fields, &params, point, force, color)
    }

    /// Press at a pixel position (origin top-left): starts the loop and fires a
    /// random-direction click splat.
    pub fn pointer_down(&mut self, id: PointerId, position: Vec2) -> Result<(), FluidError> {
        self.start();
        let canvas = self.canvas();
        let color = generate_color(self.config.palette, &mut self.rng);
        let pointer = self.pointers.press(id, position, canvas, color);
        let burst = generate_color(self.config.palette, &mut self.rng) * self.config.click_intensity;
        let force = click_force(self.config.click_impulse, &mut self.rng);
        self.splat(pointer.texcoord, force, burst)
    }

    pub fn pointer_move(&mut self, id: PointerId, position: Vec2) {
        self.start();
        let canvas = self.canvas();
        self.pointers.move_to(id, position, canvas);
    }

    pub fn pointer_up(&mut self, id: PointerId) {
        self.pointers.release(id);
    }

    /// Recreate fields when the drawing buffer size changed.
    pub fn resize(&mut self, canvas: UVec2) -> Result<bool, FluidError> {
        if canvas.x == 0 || canvas.y == 0 {
            debug!(target: "fluid::driver", "ignoring zero-area canvas {}x{}", canvas.x, canvas.y);
            return Ok(false);
        }
        if canvas == self.canvas() {
            return Ok(false);
        }
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(false);
        };
        let layout = field_layout(&self.config, gpu.formats, gpu.filtering, canvas);
        // The drawing buffer takes the new size only once every field has it.
        gpu.fields.resize(&mut self.backend, &gpu.programs, &layout)?;
        self.backend.set_drawing_buffer_size(canvas);
        info!(
            target: "fluid::driver",
            "canvas resized to {}x{} sim={}x{} dye={}x{}",
            canvas.x, canvas.y, layout.sim.x, layout.sim.y, layout.dye.x, layout.dye.y
        );
        Ok(true)
    }

    /// Advance one frame: clock, resize, colours, pending splats, step, render.
    pub fn tick(&mut self, now: f64, canvas: UVec2) -> Result<FrameOutcome, FluidError> {
        if !self.running || self.gpu.is_none() {
            return Ok(FrameOutcome::default());
        }
        let dt = self.clock.tick(now);
        let resized = self.resize(canvas)?;

        if !self.paused && self.colors.advance(dt) {
            let palette = self.config.palette;
            let rng = &mut self.rng;
            self.pointers.recolor(|| generate_color(palette, &mut *rng));
        }

        let pending = self.pointers.drain_moved();
        let params = self.splat_params();
        let display = self.display_params();
        let canvas = self.canvas();
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(FrameOutcome::default());
        };
        for p in &pending {
            splat::splat_pointer(&mut self.backend, &gpu.programs, &mut gpu.fields, &params, p, self.config.splat_force)?;
        }

        let stepped = !self.paused;
        if stepped {
            let step = StepParams {
                dt,
                curl: self.config.curl,
                pressure: self.config.pressure,
                pressure_iterations: self.config.pressure_iterations,
                velocity_dissipation: self.config.velocity_dissipation,
                density_dissipation: self.config.density_dissipation,
            };
            stepper::step(&mut self.backend, &gpu.programs, &mut gpu.fields, &step)?;
        }
        render::render(&mut self.backend, &gpu.programs, &gpu.fields.dye, DrawTarget::Screen, canvas, &display)?;

        Ok(FrameOutcome { ran: true, dt, resized, splats: pending.len(), stepped })
    }

    /// Render the dye offscreen at the capture resolution.
    pub fn capture(&mut self) -> Result<CapturedImage, FluidError> {
        let size = self.capture_size();
        let display = self.display_params();
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| FluidError::Capture("effect is shut down".into()))?;
        render::capture(&mut self.backend, &gpu.programs, &gpu.fields.dye, size, &display)
    }

    /// Render the dye offscreen and let `export` take the target before it is released,
    /// for backends that read targets back asynchronously.
    pub fn render_capture<R>(
        &mut self,
        export: impl FnOnce(&B, TargetId) -> Result<R, FluidError>,
    ) -> Result<(R, UVec2), FluidError> {
        let size = self.capture_size();
        let display = self.display_params();
        let gpu = self
            .gpu
            .as_ref()
            .ok_or_else(|| FluidError::Capture("effect is shut down".into()))?;
        let exported = render::render_capture(&mut self.backend, &gpu.programs, &gpu.fields.dye, size, &display, export)?;
        Ok((exported, size.max(UVec2::ONE)))
    }

    fn capture_size(&self) -> UVec2 {
        grid_resolution(self.config.capture_resolution, self.canvas())
    }

    /// Stop the loop and release every target, program and shader. Idempotent.
    pub fn shutdown(&mut self) {
        self.running = false;
        self.pointers.clear();
        if let Some(gpu) = self.gpu.take() {
            gpu.fields.release(&mut self.backend);
            gpu.programs.release(&mut self.backend);
            info!(target: "fluid::driver", "fluid effect released");
        }
    }
}

impl<B: RenderBackend> Drop for FluidEffect<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn field_layout(config: &FluidConfig, formats: SupportedFormats, filtering: Filtering, canvas: UVec2) -> FieldLayout {
    FieldLayout {
        sim: grid_resolution(config.sim_resolution, canvas),
        dye: grid_resolution(config.dye_resolution, canvas),
        formats,
        filtering,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_zero_dt() {
        let mut clock = FrameClock::new(1.0 / 60.0);
        assert_eq!(clock.tick(5.0), 0.0);
        assert!((clock.tick(5.01) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn long_frames_are_clamped() {
        let mut clock = FrameClock::new(1.0 / 60.0);
        clock.tick(0.0);
        assert_eq!(clock.tick(3.0), 1.0 / 60.0);
    }

    #[test]
    fn clock_going_backwards_yields_zero() {
        let mut clock = FrameClock::new(1.0 / 60.0);
        clock.tick(2.0);
        assert_eq!(clock.tick(1.0), 0.0);
    }

    #[test]
    fn reset_forgets_last_tick() {
        let mut clock = FrameClock::new(1.0);
        clock.tick(0.0);
        clock.reset();
        assert_eq!(clock.tick(0.5), 0.0);
    }
}
