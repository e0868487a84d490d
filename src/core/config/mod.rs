pub mod config;

pub use config::{DiagnosticsConfig, FluidConfig, SplashConfig, WindowConfig};
