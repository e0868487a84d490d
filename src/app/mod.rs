pub mod capture;
pub mod display;
pub mod input;
pub mod plugin;

pub use plugin::{SplashCursorPlugin, SplashEffect};
