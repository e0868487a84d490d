use bevy::prelude::*;
use rand::Rng;
use serde::Deserialize;

/// How splat colours are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SplatPalette {
    /// Light colours, every channel in `[0.8, 1.0]`.
    #[default]
    Bright,
    /// Random fully saturated hue, scaled down to `0.15` intensity.
    Hue,
}

pub fn generate_color<R: Rng + ?Sized>(palette: SplatPalette, rng: &mut R) -> Vec3 {
    match palette {
        SplatPalette::Bright => Vec3::new(
            rng.gen_range(0.8..=1.0),
            rng.gen_range(0.8..=1.0),
            rng.gen_range(0.8..=1.0),
        ),
        SplatPalette::Hue => hsv_to_rgb(rng.gen::<f32>(), 1.0, 1.0) * 0.15,
    }
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match (i as i32).rem_euclid(6) {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

pub fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range == 0.0 {
        return min;
    }
    (value - min).rem_euclid(range) + min
}

/// Timer driving periodic recolouring of active pointers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorCycle {
    timer: f32,
    speed: f32,
}

impl ColorCycle {
    pub fn new(speed: f32) -> Self {
        Self { timer: 0.0, speed }
    }

    /// Advance by `dt`; returns true when a new colour round is due.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.timer += dt * self.speed;
        if self.timer >= 1.0 {
            self.timer = wrap(self.timer, 0.0, 1.0);
            return true;
        }
        false
    }

    pub fn phase(&self) -> f32 {
        self.timer
    }
}
