use bevy::prelude::*;
use serde::Deserialize;
use std::{fs, path::Path};

use crate::fluid::{Capabilities, SplatPalette, StartMode};

#[derive(Debug, Deserialize, Resource, Clone, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub width: f32,
    pub height: f32,
    pub title: String,
}
impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            title: "Splash Cursor".into(),
        }
    }
}

/// Tunables of the fluid effect, read once when the effect is created.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FluidConfig {
    pub sim_resolution: u32,
    pub dye_resolution: u32,
    pub capture_resolution: u32,
    pub density_dissipation: f32,
    pub velocity_dissipation: f32,
    /// Fraction of last frame's pressure kept as the Jacobi warm start.
    pub pressure: f32,
    pub pressure_iterations: u32,
    /// Vorticity confinement strength.
    pub curl: f32,
    pub splat_radius: f32,
    pub splat_force: f32,
    pub shading: bool,
    pub color_update_speed: f32,
    pub back_color: [f32; 3],
    pub transparent: bool,
    pub paused: bool,
    pub start_mode: StartMode,
    pub click_intensity: f32,
    pub click_impulse: f32,
    pub palette: SplatPalette,
    /// Upper bound of one step's dt in seconds.
    pub max_frame_dt: f32,
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}
impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            sim_resolution: 128,
            dye_resolution: 1024,
            capture_resolution: 512,
            density_dissipation: 1.0,
            velocity_dissipation: 0.5,
            pressure: 0.2,
            pressure_iterations: 20,
            curl: 10.0,
            splat_radius: 0.3,
            splat_force: 6000.0,
            shading: true,
            color_update_speed: 10.0,
            back_color: [0.0, 0.0, 0.0],
            transparent: true,
            paused: false,
            start_mode: StartMode::Eager,
            click_intensity: 5.0,
            click_impulse: 100.0,
            palette: SplatPalette::Bright,
            max_frame_dt: 0.016666,
            seed: None,
        }
    }
}
impl FluidConfig {
    pub fn back_color(&self) -> Vec3 {
        Vec3::from_array(self.back_color)
    }

    /// Settings actually usable on a platform: without linear filtering the dye
    /// grid drops to 256 and shading is turned off.
    pub fn degraded(&self, capabilities: Capabilities) -> Self {
        let mut cfg = self.clone();
        if !capabilities.linear_filtering {
            cfg.dye_resolution = 256;
            cfg.shading = false;
        }
        cfg
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    /// Seconds between frame statistics log lines.
    pub log_interval: f32,
}
impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_interval: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Resource, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SplashConfig {
    pub window: WindowConfig,
    pub fluid: FluidConfig,
    pub diagnostics: DiagnosticsConfig,
}

impl SplashConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let data = fs::read_to_string(&path).map_err(|e| format!("read config: {e}"))?;
        ron::from_str(&data).map_err(|e| format!("parse RON: {e}"))
    }
    pub fn load_or_default(path: impl AsRef<Path>) -> (Self, Option<String>) {
        match Self::load_from_file(&path) {
            Ok(cfg) => (cfg, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
    /// Merge several RON files, later ones overriding earlier ones field by field.
    /// Returns the config, the files used and any per-file errors.
    pub fn load_layered<P, I>(paths: I) -> (Self, Vec<String>, Vec<String>)
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = P>,
    {
        use ron::value::Value;
        fn merge_value(base: &mut Value, overlay: Value) {
            match (base, overlay) {
                (Value::Map(bm), Value::Map(om)) => {
                    for (k, v) in om.into_iter() {
                        let mut incoming = Some(v);
                        for (ek, ev) in bm.iter_mut() {
                            if *ek == k {
                                if let Some(val) = incoming.take() {
                                    merge_value(ev, val);
                                }
                                break;
                            }
                        }
                        if let Some(val) = incoming {
                            bm.insert(k, val);
                        }
                    }
                }
                (b, o) => *b = o,
            }
        }
        let mut merged: Option<Value> = None;
        let mut used = Vec::new();
        let mut errors = Vec::new();
        for p in paths {
            let path_ref = p.as_ref();
            match fs::read_to_string(path_ref) {
                Ok(txt) => match ron::from_str::<Value>(&txt) {
                    Ok(val) => {
                        match &mut merged {
                            Some(cur) => merge_value(cur, val),
                            None => merged = Some(val),
                        }
                        used.push(path_ref.display().to_string());
                    }
                    Err(e) => errors.push(format!("{}: parse error: {e}", path_ref.display())),
                },
                Err(e) => errors.push(format!("{}: read error: {e}", path_ref.display())),
            }
        }
        let Some(val) = merged else {
            return (Self::default(), used, errors);
        };
        match val.into_rust::<SplashConfig>() {
            Ok(cfg) => (cfg, used, errors),
            Err(e) => {
                errors.push(format!("failed to deserialize merged config; using defaults: {e}"));
                (Self::default(), used, errors)
            }
        }
    }
    pub fn validate(&self) -> Vec<String> {
        let mut w = Vec::new();
        if self.window.width <= 0.0 || self.window.height <= 0.0 {
            w.push("window dimensions must be > 0".into());
        }
        let f = &self.fluid;
        if f.sim_resolution == 0 {
            w.push("fluid.sim_resolution must be > 0".into());
        }
        if f.dye_resolution == 0 {
            w.push("fluid.dye_resolution must be > 0".into());
        }
        if f.capture_resolution == 0 {
            w.push("fluid.capture_resolution must be > 0".into());
        }
        if f.dye_resolution > 4096 {
            w.push(format!(
                "fluid.dye_resolution {} very high; each frame touches every dye texel",
                f.dye_resolution
            ));
        }
        if f.density_dissipation < 0.0 || f.velocity_dissipation < 0.0 {
            w.push("fluid dissipation rates must be >= 0 (negative values amplify)".into());
        }
        if !(0.0..=1.0).contains(&f.pressure) {
            w.push(format!("fluid.pressure {} outside 0..1", f.pressure));
        }
        if f.pressure_iterations == 0 {
            w.push("fluid.pressure_iterations is 0; flow will not be incompressible".into());
        } else if f.pressure_iterations > 200 {
            w.push(format!(
                "fluid.pressure_iterations {} very high; performance may suffer",
                f.pressure_iterations
            ));
        }
        if f.curl < 0.0 {
            w.push("fluid.curl negative -> vorticity damped instead of confined".into());
        }
        if f.splat_radius <= 0.0 {
            w.push("fluid.splat_radius must be > 0".into());
        }
        if f.color_update_speed < 0.0 {
            w.push("fluid.color_update_speed negative -> colours never cycle".into());
        }
        if f.back_color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            w.push(format!("fluid.back_color {:?} outside 0..1", f.back_color));
        }
        if f.max_frame_dt <= 0.0 {
            w.push("fluid.max_frame_dt must be > 0; the simulation will not advance".into());
        }
        if self.diagnostics.enabled && self.diagnostics.log_interval <= 0.0 {
            w.push("diagnostics.log_interval must be > 0".into());
        }
        w
    }
}
