use thiserror::Error;

use super::backend::{ProgramId, ShaderId, ShaderKind, TargetId};

/// Errors surfaced by the fluid effect and its render backends.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FluidError {
    /// No rendering context could be obtained (e.g. zero-area canvas).
    #[error("rendering context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("failed to compile {shader:?} shader: {log}")]
    ShaderCompile { shader: ShaderKind, log: String },

    #[error("failed to link {program:?} program: {log}")]
    ProgramLink { program: ShaderKind, log: String },

    /// A program is missing a uniform the solver needs to drive it.
    #[error("{program:?} program has no active uniform `{name}`")]
    MissingUniform { program: ShaderKind, name: &'static str },

    #[error("unknown render target {0:?}")]
    UnknownTarget(TargetId),

    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramId),

    #[error("unknown shader {0:?}")]
    UnknownShader(ShaderId),

    #[error("uniform `{name}` received a value of the wrong type")]
    UniformType { name: &'static str },

    /// The draw samples the same target it writes to.
    #[error("draw into {0:?} samples its own output")]
    FeedbackLoop(TargetId),

    #[error("capture failed: {0}")]
    Capture(String),
}
