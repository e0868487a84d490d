use bevy::prelude::*;

use crate::app::plugin::{FluidFrameStats, SplashEffect};
use crate::core::config::SplashConfig;

#[derive(Resource, Debug, Clone)]
pub struct DebugState {
    pub enabled: bool,
    pub log_interval: f32,
    pub time_accum: f32,
    pub frame_counter: u64,
}

impl Default for DebugState {
    fn default() -> Self {
        Self {
            enabled: true,
            log_interval: 2.0,
            time_accum: 0.0,
            frame_counter: 0,
        }
    }
}

#[derive(Resource, Default, Debug, Clone, PartialEq)]
pub struct DebugStats {
    pub fps: f32,
    pub frame_time_ms: f32,
    pub sim_frames: u64,
    pub splats: u64,
    pub paused: bool,
    pub live_targets: usize,
    pub live_programs: usize,
}

pub fn apply_diagnostics_config(cfg: Option<Res<SplashConfig>>, mut state: ResMut<DebugState>) {
    if let Some(cfg) = cfg {
        state.enabled = cfg.diagnostics.enabled;
        state.log_interval = cfg.diagnostics.log_interval.max(0.1);
    }
}

pub fn debug_stats_collect_system(
    time: Res<Time>,
    frame: Res<FluidFrameStats>,
    splash: Res<SplashEffect>,
    mut state: ResMut<DebugState>,
    mut stats: ResMut<DebugStats>,
) {
    state.frame_counter += 1;
    let dt = time.delta_secs().max(1e-6);
    let inst_fps = 1.0 / dt;
    if stats.fps == 0.0 {
        stats.fps = inst_fps;
    } else {
        stats.fps = stats.fps * 0.9 + inst_fps * 0.1;
    }
    let inst_ms = dt * 1000.0;
    if stats.frame_time_ms == 0.0 {
        stats.frame_time_ms = inst_ms;
    } else {
        stats.frame_time_ms = stats.frame_time_ms * 0.9 + inst_ms * 0.1;
    }
    stats.sim_frames = frame.frames;
    stats.splats = frame.splats;
    match splash.effect.as_ref() {
        Some(effect) => {
            let live = effect.backend().live();
            stats.paused = effect.is_paused();
            stats.live_targets = live.textures;
            stats.live_programs = live.programs;
        }
        None => {
            stats.paused = false;
            stats.live_targets = 0;
            stats.live_programs = 0;
        }
    }
}
