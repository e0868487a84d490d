use bevy::prelude::*;
use splash_cursor::fluid::backend::{
    Blend, ChannelLayout, Filtering, RenderBackend, ShaderKind, TargetDesc, TexelType, TextureFormat, UniformValue,
};
use splash_cursor::fluid::formats::{resolve_format, SupportedFormats};
use splash_cursor::fluid::programs::{ProgramOptions, ProgramRegistry};
use splash_cursor::fluid::targets::{grid_resolution, resize_double, DoubleTarget};
use splash_cursor::fluid::{Capabilities, CpuBackend, FluidError, ResourceCounts};

const OPTIONS: ProgramOptions = ProgramOptions { manual_filtering: false, shading: true };

fn desc(width: u32, height: u32) -> TargetDesc {
    TargetDesc {
        width,
        height,
        format: TextureFormat::new(ChannelLayout::Rgba, TexelType::Float),
        filtering: Filtering::Linear,
    }
}

#[test]
fn full_capabilities_keep_requested_formats() {
    let mut backend = CpuBackend::new(UVec2::new(8, 8));
    let formats = SupportedFormats::resolve(&mut backend);
    assert_eq!(formats.rgba, TextureFormat::new(ChannelLayout::Rgba, TexelType::HalfFloat));
    assert_eq!(formats.rg, TextureFormat::new(ChannelLayout::Rg, TexelType::HalfFloat));
    assert_eq!(formats.r, TextureFormat::new(ChannelLayout::R, TexelType::HalfFloat));
}

#[test]
fn missing_layouts_widen_before_precision_drops() {
    let caps = Capabilities { single_channel: false, two_channel: false, ..Capabilities::full() };
    let mut backend = CpuBackend::with_capabilities(UVec2::new(8, 8), caps);
    let r = resolve_format(&mut backend, ChannelLayout::R, TexelType::HalfFloat);
    assert_eq!(r, TextureFormat::new(ChannelLayout::Rgba, TexelType::HalfFloat));
}

#[test]
fn missing_float_precision_falls_back_to_bytes() {
    let caps = Capabilities { half_float: false, float: false, ..Capabilities::full() };
    let mut backend = CpuBackend::with_capabilities(UVec2::new(8, 8), caps);
    let formats = SupportedFormats::resolve(&mut backend);
    assert_eq!(formats.rg, TextureFormat::new(ChannelLayout::Rg, TexelType::UnsignedByte));
    assert_eq!(backend.live(), ResourceCounts::default(), "probing must not leak");
}

#[test]
fn registry_build_and_release_balance() {
    let mut backend = CpuBackend::new(UVec2::new(8, 8));
    let registry = ProgramRegistry::build(&mut backend, OPTIONS).expect("shader set should build");
    let live = backend.live();
    assert_eq!(live.shaders, 11);
    assert_eq!(live.programs, 10);
    registry.release(&mut backend);
    assert_eq!(backend.live(), ResourceCounts::default());
}

#[test]
fn any_shader_failure_leaves_nothing_behind() {
    let kinds = std::iter::once(ShaderKind::BaseVertex).chain(ShaderKind::FRAGMENTS);
    for kind in kinds {
        let mut backend = CpuBackend::new(UVec2::new(8, 8)).fail_shader(kind);
        let err = ProgramRegistry::build(&mut backend, OPTIONS).unwrap_err();
        assert!(matches!(err, FluidError::ShaderCompile { .. }), "{kind:?}: {err}");
        assert_eq!(backend.live(), ResourceCounts::default(), "{kind:?} leaked resources");
    }
}

#[test]
fn same_size_resize_is_a_no_op() {
    let mut backend = CpuBackend::new(UVec2::new(8, 8));
    let registry = ProgramRegistry::build(&mut backend, OPTIONS).unwrap();
    let mut double = DoubleTarget::create(&mut backend, desc(8, 8)).unwrap();
    let before = backend.totals();
    for _ in 0..3 {
        let changed = resize_double(&mut backend, &registry.copy, &mut double, desc(8, 8)).unwrap();
        assert!(!changed);
    }
    assert_eq!(backend.totals(), before);
    double.release(&mut backend);
    registry.release(&mut backend);
}

#[test]
fn resize_carries_the_field_forward() {
    let mut backend = CpuBackend::new(UVec2::new(8, 8));
    let registry = ProgramRegistry::build(&mut backend, OPTIONS).unwrap();
    let mut double = DoubleTarget::create(&mut backend, desc(4, 4)).unwrap();
    let fill = Vec4::new(0.25, 0.5, 0.75, 1.0);
    backend.texture_mut(double.read().id).unwrap().fill(fill);

    let changed = resize_double(&mut backend, &registry.copy, &mut double, desc(8, 6)).unwrap();
    assert!(changed);
    assert_eq!(double.size(), UVec2::new(8, 6));
    let texels = backend.texture(double.read().id).unwrap().texels();
    assert!(texels.iter().all(|t| (*t - fill).abs().max_element() < 1e-6));

    // one double buffer live, the old pair released
    assert_eq!(backend.live().textures, 2);
    double.release(&mut backend);
    registry.release(&mut backend);
    assert_eq!(backend.live(), ResourceCounts::default());
}

#[test]
fn grid_follows_the_longer_side() {
    for (w, h) in [(1920u32, 1080u32), (1080, 1920), (800, 800), (3000, 1000), (7, 5)] {
        let grid = grid_resolution(128, UVec2::new(w, h));
        assert_eq!(grid.min_element(), 128, "{w}x{h}");
        let expected = (128.0 * w.max(h) as f32 / w.min(h) as f32).round() as u32;
        assert_eq!(grid.max_element(), expected, "{w}x{h}");
        assert_eq!(grid.x >= grid.y, w >= h, "{w}x{h}: orientation must match");
    }
}

#[test]
fn drawing_into_a_sampled_target_is_rejected() {
    let mut backend = CpuBackend::new(UVec2::new(8, 8));
    let registry = ProgramRegistry::build(&mut backend, OPTIONS).unwrap();
    let double = DoubleTarget::create(&mut backend, desc(4, 4)).unwrap();
    let err = registry
        .copy
        .draw(
            &mut backend,
            double.read().as_draw_target(),
            &[("u_texture", UniformValue::Texture(double.read().id))],
            Blend::Disabled,
            None,
        )
        .unwrap_err();
    assert_eq!(err, FluidError::FeedbackLoop(double.read().id));
    double.release(&mut backend);
    registry.release(&mut backend);
}

#[test]
fn zero_sized_targets_are_refused() {
    let mut backend = CpuBackend::new(UVec2::new(8, 8));
    assert!(backend.create_target(&desc(0, 4)).is_err());
    assert_eq!(backend.live(), ResourceCounts::default());
}
