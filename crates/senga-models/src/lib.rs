#![doc = include_str!("../README.md")]

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(not(feature = "onnx"))]
#[path = "onnx_stub.rs"]
pub mod onnx;
pub mod slot;

pub use onnx::OnnxStageLoader;
pub use slot::{ModelSlot, SlotState, StageChain, StageGate};

/// Super-resolution stage requested by default.
pub const UPSCALE_STAGE: &str = "waifu2x";
/// Denoise stage requested by default.
pub const DENOISE_STAGE: &str = "anime_denoise";
/// Default load order.
pub const DEFAULT_STAGES: &[&str] = &[DENOISE_STAGE, UPSCALE_STAGE];
