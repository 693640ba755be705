//! Typed error hierarchy for the enhancement engine.
//!
//! Every fault is contained at the component boundary where it occurs:
//! the classifier turns sampling faults into "not animated", the processor
//! turns backend build faults into a permanent CPU fallback, the model slot
//! turns load faults into an absent stage, and the frame loop turns cycle
//! faults into a skipped frame.  Nothing here is fatal to the process.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! so the CLI and structured logs never parse message strings.

/// All errors originating from the senga engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Classification ───────────────────────────────────────────────
    #[error("Classification fault: {0}")]
    Classification(String),

    // ── Backends ─────────────────────────────────────────────────────
    #[error("Backend init fault: {0}")]
    BackendInit(String),

    #[error("Device error: {0}")]
    Device(String),

    // ── Model stages ─────────────────────────────────────────────────
    #[error("Model load fault for stage '{name}': {reason}")]
    ModelLoad { name: String, reason: String },

    #[error("Model inference error in stage '{name}': {reason}")]
    ModelInference { name: String, reason: String },

    // ── Frame cycle ──────────────────────────────────────────────────
    #[error("Frame cycle fault: {0}")]
    FrameCycle(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Present failed: {0}")]
    Present(String),

    #[error("Processor is detached")]
    Detached,

    // ── Type contracts ───────────────────────────────────────────────
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable integer error code.
    ///
    /// Codes are grouped by category:
    /// - 1xx: classification
    /// - 2xx: backends and devices
    /// - 3xx: model stages
    /// - 4xx: frame cycle
    /// - 5xx: type contracts
    /// - 6xx: configuration and I/O
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Classification(_) => 100,
            Self::BackendInit(_) => 200,
            Self::Device(_) => 201,
            Self::ModelLoad { .. } => 300,
            Self::ModelInference { .. } => 301,
            Self::FrameCycle(_) => 400,
            Self::Capture(_) => 401,
            Self::Present(_) => 402,
            Self::Detached => 403,
            Self::DimensionMismatch(_) => 500,
            Self::BufferTooSmall { .. } => 501,
            Self::InvalidSetting { .. } => 600,
            Self::Config(_) => 601,
            Self::Io(_) => 602,
        }
    }

    /// Whether the frame loop can keep scheduling after this error.
    ///
    /// Per-frame faults are recoverable by skipping the frame.  A detached
    /// processor and configuration errors are not.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Detached | Self::Config(_) | Self::InvalidSetting { .. }
        )
    }

    /// Wrap any error raised inside a capture/render/present cycle.
    pub fn into_cycle_fault(self) -> Self {
        match self {
            Self::FrameCycle(_) => self,
            other => Self::FrameCycle(other.to_string()),
        }
    }
}

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
