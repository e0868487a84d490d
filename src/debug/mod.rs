//! Debug module: feature gated frame statistics and periodic logging.
//! Built only when compiled with `--features debug` (on by default).

#[cfg(feature = "debug")]
mod logging;
#[cfg(feature = "debug")]
mod stats;

#[cfg(feature = "debug")]
pub use logging::debug_logging_system;
#[cfg(feature = "debug")]
pub use stats::{apply_diagnostics_config, debug_stats_collect_system, DebugState, DebugStats};

use bevy::prelude::*;

pub struct DebugPlugin;

impl Plugin for DebugPlugin {
    #[cfg(feature = "debug")]
    fn build(&self, app: &mut App) {
        use crate::app::plugin::SplashFrameSet;

        app.init_resource::<DebugState>()
            .init_resource::<DebugStats>()
            .add_systems(Startup, apply_diagnostics_config)
            .add_systems(
                Update,
                (debug_stats_collect_system, debug_logging_system)
                    .chain()
                    .after(SplashFrameSet),
            );
    }

    #[cfg(not(feature = "debug"))]
    fn build(&self, _app: &mut App) {}
}
