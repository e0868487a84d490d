pub mod app;
pub mod core;
pub mod debug;
pub mod fluid;

// Curated re-exports
pub use app::{SplashCursorPlugin, SplashEffect};
pub use core::config::{FluidConfig, SplashConfig, WindowConfig};
pub use fluid::{CpuBackend, FluidEffect, FluidError, GpuBackend};
