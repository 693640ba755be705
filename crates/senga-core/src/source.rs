//! External collaborators consumed by the engine.
//!
//! The engine never discovers sources or positions surfaces itself.  A host
//! adapter implements these traits and hands the objects to the session.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::frame::Frame;

/// Fallback sampling size when a source does not report a native size.
pub const DEFAULT_SAMPLE_SIZE: u32 = 100;

/// Stable identity of a live video source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// How much media data a source has buffered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// True once a frame at the current playback position can be captured.
    pub fn has_current_data(self) -> bool {
        self >= Self::HaveCurrentData
    }
}

/// A live video source.
#[async_trait]
pub trait VideoSource: Send {
    fn id(&self) -> SourceId;

    /// Address of the media (URL or path).  Used by the classifier.
    fn locator(&self) -> &str;

    fn ready_state(&self) -> ReadyState;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;

    /// Intrinsic media resolution, when known and non-zero.
    fn native_size(&self) -> Option<(u32, u32)>;

    /// Size of the element as laid out by the host.
    fn display_size(&self) -> (u32, u32);

    /// Draw the frame at the current playback position into `frame`.
    /// `frame` is already sized to [`surface_size`](Self::surface_size).
    fn capture(&mut self, frame: &mut Frame) -> Result<()>;

    /// Resolves once the source has current data.  Called at most once per
    /// processor, while it is waiting to start.
    async fn data_ready(&mut self) -> Result<()>;

    /// Working resolution: native size, falling back to displayed size.
    fn surface_size(&self) -> (u32, u32) {
        match self.native_size() {
            Some((w, h)) if w > 0 && h > 0 => (w, h),
            _ => self.display_size(),
        }
    }
}

/// Drawable output surface owned by one processor.  The host positions it
/// in place of the source's own output.
pub trait PresentSurface: Send {
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    fn present(&mut self, frame: &Frame) -> Result<()>;

    fn release(&mut self) {}
}

/// Supplies one frame for pixel-statistics classification.
pub trait FrameSampler {
    fn sample(&mut self) -> Result<Frame>;
}

/// Samples a [`VideoSource`] at its native size, or at
/// [`DEFAULT_SAMPLE_SIZE`] square when the native size is unknown.
pub struct SourceSampler<'a, S: VideoSource + ?Sized> {
    source: &'a mut S,
    default_size: u32,
}

impl<'a, S: VideoSource + ?Sized> SourceSampler<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        Self {
            source,
            default_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_default_size(mut self, size: u32) -> Self {
        self.default_size = size;
        self
    }
}

impl<S: VideoSource + ?Sized> FrameSampler for SourceSampler<'_, S> {
    fn sample(&mut self) -> Result<Frame> {
        if !self.source.ready_state().has_current_data() {
            return Err(EngineError::Classification(format!(
                "{} has no current data ({:?})",
                self.source.id(),
                self.source.ready_state()
            )));
        }
        let (w, h) = self
            .source
            .native_size()
            .unwrap_or((self.default_size, self.default_size));
        if w == 0 || h == 0 {
            return Err(EngineError::Classification(format!(
                "{} reports zero sample size {w}x{h}",
                self.source.id()
            )));
        }
        let mut frame = Frame::new(w, h);
        self.source
            .capture(&mut frame)
            .map_err(|err| EngineError::Classification(format!("sample draw failed: {err}")))?;
        Ok(frame)
    }
}

/// Resolves a stage name to a model asset on disk.
pub trait ModelAssetProvider: Send + Sync {
    fn resolve(&self, name: &str) -> Result<PathBuf>;
}

/// Looks up `<root>/<name>.<extension>`.
#[derive(Clone, Debug)]
pub struct DirectoryAssets {
    root: PathBuf,
    extension: String,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModelAssetProvider for DirectoryAssets {
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(EngineError::ModelLoad {
                name: name.to_string(),
                reason: "stage name must be a plain file stem".into(),
            });
        }
        let path = self.root.join(format!("{name}.{}", self.extension));
        if !path.is_file() {
            return Err(EngineError::ModelLoad {
                name: name.to_string(),
                reason: format!("asset not found at {}", path.display()),
            });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        ready: ReadyState,
        native: Option<(u32, u32)>,
        captures: usize,
    }

    #[async_trait]
    impl VideoSource for StubSource {
        fn id(&self) -> SourceId {
            SourceId(7)
        }
        fn locator(&self) -> &str {
            "file:///clip.mp4"
        }
        fn ready_state(&self) -> ReadyState {
            self.ready
        }
        fn is_paused(&self) -> bool {
            false
        }
        fn is_ended(&self) -> bool {
            false
        }
        fn native_size(&self) -> Option<(u32, u32)> {
            self.native
        }
        fn display_size(&self) -> (u32, u32) {
            (640, 360)
        }
        fn capture(&mut self, frame: &mut Frame) -> Result<()> {
            self.captures += 1;
            frame.as_bytes_mut().fill(9);
            Ok(())
        }
        async fn data_ready(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sampler_uses_default_size_without_native_size() {
        let mut source = StubSource {
            ready: ReadyState::HaveEnoughData,
            native: None,
            captures: 0,
        };
        let frame = SourceSampler::new(&mut source).sample().expect("sample");
        assert_eq!(frame.dimensions(), (DEFAULT_SAMPLE_SIZE, DEFAULT_SAMPLE_SIZE));
        assert_eq!(source.captures, 1);
    }

    #[test]
    fn sampler_rejects_unready_and_zero_sized_sources() {
        let mut source = StubSource {
            ready: ReadyState::HaveMetadata,
            native: Some((320, 240)),
            captures: 0,
        };
        let err = SourceSampler::new(&mut source).sample().expect_err("not ready");
        assert_eq!(err.error_code(), 100);

        source.ready = ReadyState::HaveCurrentData;
        source.native = Some((0, 240));
        let err = SourceSampler::new(&mut source).sample().expect_err("zero size");
        assert!(err.to_string().contains("zero sample size"));
        assert_eq!(source.captures, 0);
    }

    #[test]
    fn surface_size_falls_back_to_display_size() {
        let source = StubSource {
            ready: ReadyState::HaveNothing,
            native: Some((0, 0)),
            captures: 0,
        };
        assert_eq!(source.surface_size(), (640, 360));
    }

    #[test]
    fn directory_assets_reject_path_traversal() {
        let assets = DirectoryAssets::new(std::env::temp_dir(), "onnx");
        let err = assets.resolve("../etc/passwd").expect_err("traversal must fail");
        assert!(err.to_string().contains("plain file stem"));
    }
}
