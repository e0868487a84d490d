//! Pointer-driven fluid simulation written against [`RenderBackend`].

pub mod backend;
pub mod color;
pub mod cpu;
pub mod driver;
pub mod error;
pub mod formats;
pub mod gpu;
pub mod pointer;
pub mod programs;
pub mod render;
pub mod splat;
pub mod stepper;
pub mod targets;

pub use backend::{Capabilities, RenderBackend, ResourceCounts, ResourceTotals};
pub use color::SplatPalette;
pub use cpu::CpuBackend;
pub use driver::{FluidEffect, FrameClock, FrameOutcome, StartMode};
pub use error::FluidError;
pub use gpu::GpuBackend;
pub use pointer::PointerId;
pub use render::CapturedImage;
