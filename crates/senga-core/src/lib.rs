#![doc = include_str!("../README.md")]

pub mod backend;
pub mod error;
pub mod frame;
pub mod settings;
pub mod source;

pub use error::{EngineError, Result};
pub use frame::Frame;
pub use settings::{EnhancementSettings, Preset, SettingsPatch, Upscaling};
