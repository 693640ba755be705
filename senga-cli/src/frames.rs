//! Image-file adapters for the engine's collaborator traits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;
use senga_core::source::{FrameSampler, PresentSurface, ReadyState, SourceId, VideoSource};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

fn image_error(path: &Path, err: image::ImageError) -> EngineError {
    match err {
        image::ImageError::IoError(io) => EngineError::Io(io),
        other => EngineError::Capture(format!("{}: {other}", path.display())),
    }
}

/// Decode an image file into an RGBA8 frame.
pub fn load_frame(path: &Path) -> Result<Frame> {
    if !path.is_file() {
        return Err(EngineError::Config(format!(
            "Input image not found: {}",
            path.display()
        )));
    }
    let rgba = image::open(path)
        .map_err(|err| image_error(path, err))?
        .into_rgba8();
    let (w, h) = rgba.dimensions();
    Frame::from_rgba(w, h, rgba.into_raw())
}

/// Encode a frame; the format follows the file extension.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let (w, h) = frame.dimensions();
    let img = image::RgbaImage::from_raw(w, h, frame.as_bytes().to_vec()).ok_or(
        EngineError::BufferTooSmall {
            need: frame.pixel_count() * 4,
            have: frame.as_bytes().len(),
        },
    )?;
    let encoded = if has_extension(path, &["jpg", "jpeg"]) {
        image::DynamicImage::ImageRgba8(img).into_rgb8().save(path)
    } else {
        img.save(path)
    };
    encoded.map_err(|err| match err {
        image::ImageError::IoError(io) => EngineError::Io(io),
        other => EngineError::Present(format!("{}: {other}", path.display())),
    })
}

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Image files directly under `dir`, sorted by name.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(EngineError::Config(format!(
            "Frame directory not found: {}",
            dir.display()
        )));
    }
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_extension(p, IMAGE_EXTENSIONS))
        .collect();
    frames.sort();
    if frames.is_empty() {
        return Err(EngineError::Config(format!(
            "No png/jpg frames in {}",
            dir.display()
        )));
    }
    Ok(frames)
}

// ─── Sampler ─────────────────────────────────────────────────────────────────

/// Hands a decoded still to the classifier.
pub struct StillSampler(pub Option<Frame>);

impl FrameSampler for StillSampler {
    fn sample(&mut self) -> Result<Frame> {
        self.0
            .take()
            .ok_or_else(|| EngineError::Classification("still already sampled".into()))
    }
}

// ─── Image sequence source ───────────────────────────────────────────────────

/// Plays a directory of stills, one per captured frame.  Ends after the
/// last still.
pub struct ImageSequenceSource {
    id: SourceId,
    locator: String,
    frames: Vec<PathBuf>,
    cursor: usize,
    next_size: Option<(u32, u32)>,
}

impl ImageSequenceSource {
    pub fn open(id: SourceId, dir: &Path) -> Result<Self> {
        let frames = list_frames(dir)?;
        let mut source = Self {
            id,
            locator: format!("file://{}", dir.display()),
            frames,
            cursor: 0,
            next_size: None,
        };
        source.peek_size()?;
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn peek_size(&mut self) -> Result<()> {
        self.next_size = match self.frames.get(self.cursor) {
            Some(path) => Some(image::image_dimensions(path).map_err(|err| image_error(path, err))?),
            None => None,
        };
        Ok(())
    }
}

#[async_trait]
impl VideoSource for ImageSequenceSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn ready_state(&self) -> ReadyState {
        if self.cursor < self.frames.len() {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveCurrentData
        }
    }

    fn is_paused(&self) -> bool {
        false
    }

    fn is_ended(&self) -> bool {
        self.cursor >= self.frames.len()
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.next_size
    }

    fn display_size(&self) -> (u32, u32) {
        self.next_size.unwrap_or((0, 0))
    }

    fn capture(&mut self, frame: &mut Frame) -> Result<()> {
        let Some(path) = self.frames.get(self.cursor).cloned() else {
            return Err(EngineError::Capture(format!("{} has ended", self.id)));
        };
        let still = load_frame(&path)?;
        self.cursor += 1;
        self.peek_size()?;
        debug!(frame = %path.display(), "Captured still");
        frame.copy_from(&still)
    }

    async fn data_ready(&mut self) -> Result<()> {
        Ok(())
    }
}

// ─── Directory surface ───────────────────────────────────────────────────────

/// Writes every presented frame to `<dir>/frame_NNNNN.png`.
pub struct DirectorySurface {
    dir: PathBuf,
    written: Arc<AtomicU64>,
}

impl DirectorySurface {
    pub fn new(dir: PathBuf, written: Arc<AtomicU64>) -> Self {
        Self { dir, written }
    }
}

impl PresentSurface for DirectorySurface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        debug!(width, height, dir = %self.dir.display(), "Output size changed");
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        let index = self.written.load(Ordering::Relaxed);
        save_frame(frame, &self.dir.join(format!("frame_{index:05}.png")))?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "senga_frames_{label}_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn sequence_plays_in_name_order_then_ends() {
        let dir = temp_dir("sequence");
        save_frame(&Frame::solid(2, 1, [9, 9, 9, 255]), &dir.join("b.png")).expect("save");
        save_frame(&Frame::solid(3, 2, [1, 1, 1, 255]), &dir.join("a.png")).expect("save");
        std::fs::write(dir.join("notes.txt"), b"skip").expect("write");

        let mut source = ImageSequenceSource::open(SourceId(1), &dir).expect("open");
        assert_eq!(source.len(), 2);
        assert_eq!(source.surface_size(), (3, 2));

        let mut frame = Frame::new(3, 2);
        source.capture(&mut frame).expect("first");
        assert_eq!(frame.pixel(0, 0), [1, 1, 1, 255]);
        assert_eq!(source.surface_size(), (2, 1));

        let mut frame = Frame::new(2, 1);
        source.capture(&mut frame).expect("second");
        assert!(source.is_ended());
        assert!(source.capture(&mut frame).is_err());
    }

    #[test]
    fn missing_input_is_a_config_error() {
        let err = load_frame(Path::new("/nonexistent/senga.png")).expect_err("missing");
        assert_eq!(err.error_code(), 601);
    }
}
