#![allow(missing_docs)]
//! Stub ONNX loader for builds without the `onnx` feature.

use std::sync::Arc;

use async_trait::async_trait;

use senga_core::backend::{EnhancementStage, StageLoader};
use senga_core::error::{EngineError, Result};
use senga_core::source::ModelAssetProvider;

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
        // Resolve first so a missing asset reports as such.
        let path = self.assets.resolve(name)?;
        Err(EngineError::ModelLoad {
            name: name.to_string(),
            reason: format!(
                "{} found, but senga-models was built without the `onnx` feature",
                path.display()
            ),
        })
    }
}
