use bevy::prelude::*;
use splash_cursor::core::config::FluidConfig;
use splash_cursor::fluid::backend::ShaderKind;
use splash_cursor::fluid::targets::grid_resolution;
use splash_cursor::fluid::{
    Capabilities, CpuBackend, FluidEffect, FluidError, PointerId, ResourceCounts, StartMode,
};

const CANVAS: UVec2 = UVec2::new(32, 24);

fn small_config() -> FluidConfig {
    FluidConfig {
        sim_resolution: 8,
        dye_resolution: 16,
        capture_resolution: 16,
        pressure_iterations: 4,
        seed: Some(11),
        ..FluidConfig::default()
    }
}

#[test]
fn teardown_after_many_frames_releases_everything() {
    let mut backend = CpuBackend::new(CANVAS);
    {
        let mut effect = FluidEffect::new(&mut backend, small_config()).unwrap();
        effect.pointer_down(PointerId::Mouse, Vec2::new(10.0, 10.0)).unwrap();
        for frame in 0..12 {
            let x = 10.0 + frame as f32;
            effect.pointer_move(PointerId::Mouse, Vec2::new(x, 12.0));
            let canvas = if frame == 6 { UVec2::new(40, 30) } else { effect.backend().canvas().size() };
            effect.tick(frame as f64 / 60.0, canvas).unwrap();
        }
    }
    let totals = backend.totals();
    assert!(totals.allocated.textures > 0);
    assert_eq!(totals.allocated, totals.released);
    assert_eq!(backend.live(), ResourceCounts::default());
}

#[test]
fn shutdown_is_idempotent_and_stops_the_loop() {
    let mut backend = CpuBackend::new(CANVAS);
    let mut effect = FluidEffect::new(&mut backend, small_config()).unwrap();
    effect.shutdown();
    effect.shutdown();
    assert!(effect.is_shut_down());
    assert!(!effect.is_running());

    let outcome = effect.tick(1.0, CANVAS).unwrap();
    assert!(!outcome.ran);
    // input after teardown is ignored rather than failing
    effect.pointer_down(PointerId::Mouse, Vec2::new(4.0, 4.0)).unwrap();
    drop(effect);
    assert_eq!(backend.live(), ResourceCounts::default());
}

#[test]
fn failed_init_leaves_no_resources() {
    for kind in [ShaderKind::BaseVertex, ShaderKind::Splat, ShaderKind::Display] {
        let mut backend = CpuBackend::new(CANVAS).fail_shader(kind);
        let result = FluidEffect::new(&mut backend, small_config());
        assert!(matches!(result, Err(FluidError::ShaderCompile { .. })));
        drop(result);
        assert_eq!(backend.live(), ResourceCounts::default(), "{kind:?}");
    }
}

#[test]
fn zero_area_resize_is_ignored() {
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), small_config()).unwrap();
    assert!(!effect.resize(UVec2::new(0, 100)).unwrap());
    let outcome = effect.tick(0.0, UVec2::new(64, 0)).unwrap();
    assert!(outcome.ran && !outcome.resized);
    assert_eq!(effect.backend().canvas().size(), CANVAS);
}

#[test]
fn resize_recreates_fields_at_the_new_aspect() {
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), small_config()).unwrap();
    let unchanged = effect.tick(0.0, CANVAS).unwrap();
    assert!(!unchanged.resized);

    let wide = UVec2::new(96, 32);
    let outcome = effect.tick(0.01, wide).unwrap();
    assert!(outcome.resized);
    let fields = effect.fields().unwrap();
    assert_eq!(fields.velocity.size(), grid_resolution(8, wide));
    assert_eq!(fields.velocity.size(), UVec2::new(24, 8));
    assert_eq!(fields.dye.size(), UVec2::new(48, 16));
    assert_eq!(fields.pressure.size(), fields.velocity.size());
    assert_eq!(effect.backend().canvas().size(), wide);
}

#[test]
fn interaction_start_mode_waits_for_input() {
    let config = FluidConfig { start_mode: StartMode::OnInteraction, ..small_config() };
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), config).unwrap();
    assert!(!effect.is_running());
    assert!(!effect.tick(0.0, CANVAS).unwrap().ran);
    assert_eq!(effect.backend().draw_count(), 0);

    effect.pointer_move(PointerId::Touch(1), Vec2::new(3.0, 3.0));
    assert!(effect.is_running());
    assert!(effect.tick(0.1, CANVAS).unwrap().ran);
}

#[test]
fn moves_become_splats_on_the_next_frame() {
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), small_config()).unwrap();
    effect.pointer_down(PointerId::Touch(4), Vec2::new(8.0, 8.0)).unwrap();
    effect.pointer_down(PointerId::Touch(5), Vec2::new(20.0, 8.0)).unwrap();
    effect.pointer_move(PointerId::Touch(4), Vec2::new(9.0, 8.0));
    effect.pointer_move(PointerId::Touch(5), Vec2::new(21.0, 9.0));
    assert_eq!(effect.tick(0.0, CANVAS).unwrap().splats, 2);
    assert_eq!(effect.tick(0.01, CANVAS).unwrap().splats, 0);

    effect.pointer_up(PointerId::Touch(4));
    assert!(effect.pointers().get(PointerId::Touch(4)).is_none());
    assert_eq!(effect.pointers().len(), 1);
}

#[test]
fn paused_effect_renders_without_stepping() {
    let config = FluidConfig { paused: true, ..small_config() };
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), config).unwrap();
    effect.splat(Vec2::splat(0.5), Vec2::new(50.0, 0.0), Vec3::ONE).unwrap();
    let dye_id = effect.fields().unwrap().dye.read().id;
    let before = effect.backend().texture(dye_id).unwrap().texels().to_vec();

    effect.tick(0.0, CANVAS).unwrap();
    let outcome = effect.tick(0.5, CANVAS).unwrap();
    assert!(outcome.ran && !outcome.stepped);
    assert_eq!(effect.fields().unwrap().dye.read().id, dye_id);
    assert_eq!(effect.backend().texture(dye_id).unwrap().texels(), before.as_slice());

    assert!(!effect.toggle_paused());
    assert!(effect.tick(0.6, CANVAS).unwrap().stepped);
}

#[test]
fn missing_linear_filtering_degrades_config() {
    let caps = Capabilities { linear_filtering: false, ..Capabilities::full() };
    let mut effect = FluidEffect::new(CpuBackend::with_capabilities(CANVAS, caps), small_config()).unwrap();
    assert_eq!(effect.config().dye_resolution, 256);
    assert!(!effect.config().shading);
    let programs = effect.programs().unwrap();
    assert!(programs.options.manual_filtering);
    assert!(!programs.options.shading);
    assert!(effect.tick(0.0, CANVAS).unwrap().ran);
}

#[test]
fn capture_renders_offscreen_and_cleans_up() {
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), small_config()).unwrap();
    effect.splat(Vec2::splat(0.5), Vec2::ZERO, Vec3::new(1.0, 0.0, 0.0)).unwrap();
    let live = effect.backend().live();

    let image = effect.capture().unwrap();
    assert_eq!((image.width, image.height), (21, 16));
    assert_eq!(image.rgba.len(), 21 * 16 * 4);
    assert!(image.rgba.chunks(4).any(|px| px[0] > 0));
    assert_eq!(effect.backend().live(), live);
}

fn run_frames(effect: &mut FluidEffect<CpuBackend>, now: &mut f64, frames: usize) {
    for _ in 0..frames {
        effect.tick(*now, CANVAS).unwrap();
        *now += 1.0 / 60.0;
    }
}

#[test]
fn colour_cycling_stops_while_paused() {
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), small_config()).unwrap();
    effect.pointer_down(PointerId::Mouse, Vec2::new(10.0, 10.0)).unwrap();
    let colour = |effect: &FluidEffect<CpuBackend>| effect.pointers().get(PointerId::Mouse).unwrap().color;
    let pressed = colour(&effect);
    let period = 1.0 / effect.config().color_update_speed as f64;
    let frames = (3.0 * period * 60.0).ceil() as usize;
    let mut now = 0.0;

    effect.set_paused(true);
    run_frames(&mut effect, &mut now, frames);
    assert_eq!(colour(&effect), pressed, "paused frames must not recolour pointers");

    effect.set_paused(false);
    run_frames(&mut effect, &mut now, frames);
    assert_ne!(colour(&effect), pressed);
}

#[test]
fn failed_resize_keeps_the_old_drawing_buffer() {
    let mut effect = FluidEffect::new(CpuBackend::new(CANVAS), small_config()).unwrap();
    let wide = UVec2::new(96, 32);
    // the dye pair fits, the velocity pair does not
    effect.backend_mut().limit_target_allocations(Some(2));
    assert!(effect.resize(wide).is_err());
    assert_eq!(effect.backend().canvas().size(), CANVAS);
    let fields = effect.fields().unwrap();
    assert_eq!(fields.dye.size(), grid_resolution(16, wide));
    assert_eq!(fields.velocity.size(), grid_resolution(8, CANVAS));

    effect.backend_mut().limit_target_allocations(None);
    assert!(effect.tick(0.0, wide).unwrap().resized);
    let fields = effect.fields().unwrap();
    assert_eq!(fields.velocity.size(), grid_resolution(8, wide));
    assert_eq!(fields.dye.size(), grid_resolution(16, wide));
    assert_eq!(effect.backend().canvas().size(), wide);
}
