//! Pipeline seams: the filter backend and the pluggable model stage.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Frame;
use crate::settings::EnhancementSettings;

/// Which filter backend a processor selected at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Gpu,
    Cpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        })
    }
}

/// Per-frame filter transform.
///
/// `render` reads `input`, writes the enhanced image into `output` (same
/// dimensions, resized by the caller) and must be a pure function of
/// `(input, settings, time)` apart from the CPU near-black offset, whose
/// source of randomness is owned by the backend.
pub trait FilterBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Human-readable device/program name for logs and status output.
    fn name(&self) -> &str;

    fn render(
        &mut self,
        input: &Frame,
        settings: &EnhancementSettings,
        time: f32,
        output: &mut Frame,
    ) -> Result<()>;

    /// Release device programs and buffers.  Called once on detach.
    fn release(&mut self) {}
}

/// A loaded super-resolution or denoise post-filter.
///
/// Opaque to the engine: it receives the filtered frame and returns a new
/// one, possibly with different dimensions.
pub trait EnhancementStage: Send {
    fn name(&self) -> &str;

    fn enhance(&mut self, frame: &Frame) -> Result<Frame>;
}

/// Resolves a stage by name.  Loading may take arbitrarily long and is never
/// awaited by the frame loop.
#[async_trait]
pub trait StageLoader: Send + Sync {
    async fn load(&self, name: &str) -> Result<Box<dyn EnhancementStage>>;
}
