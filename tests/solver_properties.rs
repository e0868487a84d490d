use bevy::prelude::*;
use splash_cursor::core::config::FluidConfig;
use splash_cursor::fluid::backend::Filtering;
use splash_cursor::fluid::cpu::Texture;
use splash_cursor::fluid::formats::SupportedFormats;
use splash_cursor::fluid::programs::{ProgramOptions, ProgramRegistry};
use splash_cursor::fluid::stepper::{compute_divergence, damp_pressure, solve_pressure, FieldLayout, Fields};
use splash_cursor::fluid::targets::DoubleTarget;
use splash_cursor::fluid::{Capabilities, CpuBackend, FluidEffect};

const GRID: u32 = 16;

fn float_caps() -> Capabilities {
    Capabilities { half_float: false, ..Capabilities::full() }
}

/// Deterministic setup: no vorticity, no projection, no decay.
fn quiet_config() -> FluidConfig {
    FluidConfig {
        sim_resolution: GRID,
        dye_resolution: GRID,
        capture_resolution: GRID,
        curl: 0.0,
        pressure: 0.0,
        pressure_iterations: 0,
        velocity_dissipation: 0.0,
        density_dissipation: 0.0,
        seed: Some(3),
        ..FluidConfig::default()
    }
}

fn effect(config: FluidConfig) -> FluidEffect<CpuBackend> {
    let backend = CpuBackend::with_capabilities(UVec2::splat(GRID), float_caps());
    FluidEffect::new(backend, config).expect("effect should initialize")
}

fn read<'a>(effect: &'a FluidEffect<CpuBackend>, double: impl Fn(&Fields) -> &DoubleTarget) -> &'a Texture {
    let fields = effect.fields().expect("fields live");
    effect.backend().texture(double(fields).read().id).expect("texture live")
}

/// Texture coordinate of the centre of cell `i` on the grid.
fn centre(i: u32) -> f32 {
    (i as f32 + 0.5) / GRID as f32
}

#[test]
fn splat_is_radially_symmetric() {
    let mut fx = effect(quiet_config());
    fx.splat(Vec2::splat(centre(7)), Vec2::ZERO, Vec3::ONE).unwrap();
    let dye = read(&fx, |f| &f.dye);

    let peak = dye.fetch(7, 7).x;
    assert!((peak - 1.0).abs() < 1e-6, "centre gets the full colour, got {peak}");
    for k in 1..5 {
        let right = dye.fetch(7 + k, 7).x;
        for other in [dye.fetch(7 - k, 7).x, dye.fetch(7, 7 + k).x, dye.fetch(7, 7 - k).x] {
            assert!((right - other).abs() < 1e-6, "offset {k}: {right} vs {other}");
        }
        assert!(right < peak);
    }
}

#[test]
fn uniform_pressure_is_a_jacobi_fixed_point() {
    let mut backend = CpuBackend::with_capabilities(UVec2::splat(GRID), float_caps());
    let programs = ProgramRegistry::build(&mut backend, ProgramOptions { manual_filtering: false, shading: false })
        .unwrap();
    let layout = FieldLayout {
        sim: UVec2::splat(8),
        dye: UVec2::splat(8),
        formats: SupportedFormats::resolve(&mut backend),
        filtering: Filtering::Linear,
    };
    let mut fields = Fields::allocate(&mut backend, &layout).unwrap();
    backend.texture_mut(fields.pressure.read().id).unwrap().fill(Vec4::splat(0.5));

    // still fluid: zero divergence everywhere
    compute_divergence(&mut backend, &programs, &mut fields).unwrap();
    damp_pressure(&mut backend, &programs, &mut fields, 0.8).unwrap();
    solve_pressure(&mut backend, &programs, &mut fields, 20).unwrap();

    let pressure = backend.texture(fields.pressure.read().id).unwrap();
    assert!(pressure.texels().iter().all(|p| (p.x - 0.4).abs() < 1e-6));

    fields.release(&mut backend);
    programs.release(&mut backend);
}

#[test]
fn boundary_walls_reflect_velocity() {
    let mut backend = CpuBackend::with_capabilities(UVec2::splat(GRID), float_caps());
    let programs = ProgramRegistry::build(&mut backend, ProgramOptions { manual_filtering: false, shading: false })
        .unwrap();
    let layout = FieldLayout {
        sim: UVec2::splat(4),
        dye: UVec2::splat(4),
        formats: SupportedFormats::resolve(&mut backend),
        filtering: Filtering::Linear,
    };
    let mut fields = Fields::allocate(&mut backend, &layout).unwrap();
    backend.texture_mut(fields.velocity.read().id).unwrap().fill(Vec4::new(1.0, 0.0, 0.0, 1.0));
    compute_divergence(&mut backend, &programs, &mut fields).unwrap();

    // Uniform flow is divergence free inside, but walls negate the outgoing component.
    let divergence = backend.texture(fields.divergence.id).unwrap();
    assert!(divergence.fetch(1, 1).x.abs() < 1e-6);
    assert!((divergence.fetch(0, 1).x - 1.0).abs() < 1e-6);
    assert!((divergence.fetch(3, 1).x + 1.0).abs() < 1e-6);

    fields.release(&mut backend);
    programs.release(&mut backend);
}

#[test]
fn single_splat_peaks_at_injection_and_decays_outward() {
    let mut fx = effect(quiet_config());
    fx.splat(Vec2::splat(centre(7)), Vec2::new(10.0, 0.0), Vec3::ONE).unwrap();
    fx.tick(0.0, UVec2::splat(GRID)).unwrap();
    let outcome = fx.tick(1.0, UVec2::splat(GRID)).unwrap();
    assert!(outcome.stepped && outcome.dt > 0.0);

    let velocity = read(&fx, |f| &f.velocity);
    let size = velocity.size();
    let (peak_index, _) = velocity
        .texels()
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, t)| if t.x > best.1 { (i, t.x) } else { best });
    let peak = UVec2::new(peak_index as u32 % size.x, peak_index as u32 / size.x);
    assert_eq!(peak, UVec2::new(7, 7));

    for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
        let mut prev = velocity.fetch(7, 7).x;
        for k in 1..4 {
            let v = velocity.fetch(7 + dx * k, 7 + dy * k).x;
            assert!(v < prev, "direction ({dx},{dy}) step {k}: {v} >= {prev}");
            prev = v;
        }
    }
}

#[test]
fn dye_decays_by_dissipation() {
    let config = FluidConfig { density_dissipation: 1.0, max_frame_dt: 0.5, ..quiet_config() };
    let mut fx = effect(config);
    let id = fx.fields().unwrap().dye.read().id;
    fx.backend_mut().texture_mut(id).unwrap().fill(Vec4::ONE);

    fx.tick(0.0, UVec2::splat(GRID)).unwrap();
    let outcome = fx.tick(10.0, UVec2::splat(GRID)).unwrap();
    assert_eq!(outcome.dt, 0.5);

    let dye = read(&fx, |f| &f.dye);
    let expected = 1.0 / 1.5;
    assert!(dye.texels().iter().all(|t| (t.x - expected).abs() < 1e-5));
}

#[test]
fn manual_filtering_path_advects_like_hardware() {
    let caps = Capabilities { linear_filtering: false, ..float_caps() };
    let backend = CpuBackend::with_capabilities(UVec2::splat(GRID), caps);
    let mut fx = FluidEffect::new(backend, quiet_config()).unwrap();
    assert!(fx.programs().unwrap().options.manual_filtering);

    fx.splat(Vec2::splat(centre(7)), Vec2::new(10.0, 0.0), Vec3::ONE).unwrap();
    fx.tick(0.0, UVec2::splat(GRID)).unwrap();
    fx.tick(1.0, UVec2::splat(GRID)).unwrap();

    let velocity = read(&fx, |f| &f.velocity);
    assert!(velocity.fetch(7, 7).x > velocity.fetch(8, 7).x);
    assert!(velocity.fetch(8, 7).x > velocity.fetch(6, 7).x, "flow carries the field downstream");
}
