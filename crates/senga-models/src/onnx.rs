//! ONNX Runtime stage loader.
//!
//! Each stage is one ONNX graph with a single NCHW `f32` RGB input in
//! `[0, 1]` and a single NCHW `f32` RGB output, possibly at a larger
//! spatial size.  Alpha is carried over from the nearest source pixel.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{Array4, Ix4};
use ort::{inputs, session::Session, value::TensorRef};
use tracing::info;

use senga_core::backend::{EnhancementStage, StageLoader};
use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;
use senga_core::source::ModelAssetProvider;

/// Loads stages from `.onnx` assets.
#[derive(Clone)]
pub struct OnnxStageLoader {
    assets: Arc<dyn ModelAssetProvider>,
}

impl OnnxStageLoader {
    pub fn new(assets: Arc<dyn ModelAssetProvider>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl StageLoader for OnnxStageLoader {
    async fn load(&self, name: &str) -> Result<Box<dyn EnhancementStage>> {
        let path = self.assets.resolve(name)?;
        let owned = name.to_string();
        let stage = tokio::task::spawn_blocking(move || OnnxStage::open(&owned, &path))
            .await
            .map_err(|e| EngineError::ModelLoad {
                name: name.to_string(),
                reason: format!("loader task failed: {e}"),
            })??;
        Ok(Box::new(stage))
    }
}

pub struct OnnxStage {
    name: String,
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxStage {
    fn open(name: &str, path: &Path) -> Result<Self> {
        let load_err = |reason: String| EngineError::ModelLoad {
            name: name.to_string(),
            reason,
        };
        let session = Session::builder()
            .map_err(|e| load_err(format!("failed to create session builder: {e}")))?
            .commit_from_file(path)
            .map_err(|e| load_err(format!("failed to load {}: {e}", path.display())))?;

        let input_name = session
            .inputs()
            .first()
            .map(|input| input.name().to_string())
            .ok_or_else(|| load_err("graph has no inputs".into()))?;
        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| load_err("graph has no outputs".into()))?;

        info!(stage = name, path = %path.display(), %input_name, %output_name, "ONNX stage ready");
        Ok(Self {
            name: name.to_string(),
            session,
            input_name,
            output_name,
        })
    }

    fn inference_err(&self, reason: String) -> EngineError {
        EngineError::ModelInference {
            name: self.name.clone(),
            reason,
        }
    }
}

impl EnhancementStage for OnnxStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn enhance(&mut self, frame: &Frame) -> Result<Frame> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let mut input = Array4::<f32>::zeros((1, 3, h, w));
        for y in 0..h {
            for x in 0..w {
                let px = frame.pixel(x as u32, y as u32);
                for c in 0..3 {
                    input[[0, c, y, x]] = px[c] as f32 / 255.0;
                }
            }
        }

        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| self.inference_err(format!("failed to create tensor ref: {e}")))?;
        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => tensor])
            .map_err(|e| EngineError::ModelInference {
                name: self.name.clone(),
                reason: format!("inference failed: {e}"),
            })?;
        let array = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| EngineError::ModelInference {
                name: self.name.clone(),
                reason: format!("output is not f32: {e}"),
            })?;

        let array = array
            .into_dimensionality::<Ix4>()
            .map_err(|e| EngineError::ModelInference {
                name: self.name.clone(),
                reason: format!("expected a rank-4 output: {e}"),
            })?;
        let (n, channels, out_h, out_w) = array.dim();
        if n != 1 || channels != 3 {
            return Err(EngineError::ModelInference {
                name: self.name.clone(),
                reason: format!("expected 1x3xHxW output, got {n}x{channels}x{out_h}x{out_w}"),
            });
        }

        let mut out = Frame::new(out_w as u32, out_h as u32);
        for y in 0..out_h {
            for x in 0..out_w {
                let sx = (x * w / out_w.max(1)) as u32;
                let sy = (y * h / out_h.max(1)) as u32;
                let alpha = frame.pixel(sx, sy)[3];
                let channel = |c: usize| (array[[0, c, y, x]].clamp(0.0, 1.0) * 255.0).round() as u8;
                out.set_pixel(x as u32, y as u32, [channel(0), channel(1), channel(2), alpha]);
            }
        }
        Ok(out)
    }
}
