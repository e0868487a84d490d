use bevy::prelude::*;

use super::stats::{DebugState, DebugStats};

pub fn debug_logging_system(time: Res<Time>, mut state: ResMut<DebugState>, stats: Res<DebugStats>) {
    if !state.enabled {
        return;
    }
    state.time_accum += time.delta_secs();
    if state.time_accum >= state.log_interval {
        state.time_accum = 0.0;
        info!(
            "FLUID frame={} t={:.3}s fps={:.1} ft_ms={:.1} sim_frames={} splats={} paused={} targets={} programs={}",
            state.frame_counter,
            time.elapsed_secs(),
            stats.fps,
            stats.frame_time_ms,
            stats.sim_frames,
            stats.splats,
            stats.paused,
            stats.live_targets,
            stats.live_programs
        );
    }
}
