#![doc = include_str!("../README.md")]

pub mod classifier;
pub mod config;
pub mod processor;
pub mod scheduler;
pub mod session;

pub use classifier::{ClassificationReason, ClassificationResult, PixelStats, classify};
pub use config::EngineConfig;
pub use processor::{CycleOutcome, FrameProcessor, ProcessorMetrics, ProcessorState, ProcessorStatus};
pub use scheduler::{IntervalTicks, ManualClock, ManualTicks, Tick, TickSource, manual_ticks, run_repeating};
pub use session::{
    AttachOutcome, BackendFactory, EnhancementSession, SessionDeps, SessionEvent, SessionStatus,
    SurfaceFactory,
};
