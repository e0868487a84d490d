use bevy::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};
use splash_cursor::core::config::FluidConfig;
use splash_cursor::fluid::{CpuBackend, FluidEffect, PointerId};

fn bench_config() -> FluidConfig {
    FluidConfig {
        sim_resolution: 32,
        dye_resolution: 64,
        seed: Some(1),
        ..FluidConfig::default()
    }
}

fn bench_tick(c: &mut Criterion) {
    let canvas = UVec2::new(128, 96);
    let mut effect = FluidEffect::new(CpuBackend::new(canvas), bench_config()).expect("effect");
    effect.pointer_down(PointerId::Mouse, Vec2::new(64.0, 48.0)).expect("click");
    c.bench_function("tick_32x64", |b| {
        let mut t = 0.0f64;
        b.iter(|| {
            t += 1.0 / 60.0;
            let x = 64.0 + 30.0 * (t as f32).sin();
            effect.pointer_move(PointerId::Mouse, Vec2::new(x, 48.0));
            let _ = effect.tick(t, canvas);
        });
    });
}

fn bench_splat(c: &mut Criterion) {
    let canvas = UVec2::new(128, 96);
    let mut effect = FluidEffect::new(CpuBackend::new(canvas), bench_config()).expect("effect");
    c.bench_function("splat_32x64", |b| {
        b.iter(|| {
            let _ = effect.splat(Vec2::splat(0.5), Vec2::new(100.0, 0.0), Vec3::ONE);
        });
    });
}

criterion_group!(benches, bench_tick, bench_splat);
criterion_main!(benches);
