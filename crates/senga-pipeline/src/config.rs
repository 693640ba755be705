//! Engine configuration.
//!
//! ```json
//! {
//!   "refresh_hz": 60,
//!   "prefer_gpu": true,
//!   "device": "auto",
//!   "cpu_mode": "settings_driven",
//!   "model_stages": ["anime_denoise", "waifu2x"],
//!   "asset_dir": "models",
//!   "sample_size": 100
//! }
//! ```
//!
//! Every field is optional.  Unknown fields are rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use senga_core::backend::StageLoader;
use senga_core::error::{EngineError, Result};
use senga_core::source::{DEFAULT_SAMPLE_SIZE, DirectoryAssets};
use senga_filters::{BackendSelection, CpuFilter, CpuMode, DeviceKind, open_device, select_backend};
use senga_models::{DEFAULT_STAGES, OnnxStageLoader};

use crate::scheduler::IntervalTicks;
use crate::session::{BackendFactory, SessionDeps, SurfaceFactory};

pub const DEFAULT_REFRESH_HZ: f64 = 60.0;
/// Upper bound on the tick rate.
pub const MAX_REFRESH_HZ: f64 = 1000.0;
/// Extension of model assets under `asset_dir`.
pub const MODEL_EXTENSION: &str = "onnx";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Scheduling rate standing in for the display refresh.
    pub refresh_hz: f64,
    /// Try the GPU path before the CPU path.
    pub prefer_gpu: bool,
    pub device: DeviceKind,
    pub cpu_mode: CpuMode,
    /// Stage names to load, in application order.
    pub model_stages: Vec<String>,
    /// Directory holding `<stage>.onnx`.  No stages load without it.
    pub asset_dir: Option<PathBuf>,
    /// Square sample size for classification when the native size is unknown.
    pub sample_size: u32,
    /// Seed for the CPU near-black offset.  Random when unset.
    pub cpu_seed: Option<u64>,
    /// Attach only sources the classifier marks as animated.
    pub require_animated: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_hz: DEFAULT_REFRESH_HZ,
            prefer_gpu: true,
            device: DeviceKind::Auto,
            cpu_mode: CpuMode::SettingsDriven,
            model_stages: DEFAULT_STAGES.iter().map(|s| s.to_string()).collect(),
            asset_dir: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
            cpu_seed: None,
            require_animated: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|err| EngineError::Config(format!("Invalid engine config JSON: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!(
                "Failed to read engine config from {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_hz.is_finite()
            && self.refresh_hz > 0.0
            && self.refresh_hz <= MAX_REFRESH_HZ)
        {
            return Err(EngineError::Config(format!(
                "refresh_hz must be in (0, {MAX_REFRESH_HZ}], got {}",
                self.refresh_hz
            )));
        }
        if self.sample_size == 0 {
            return Err(EngineError::Config("sample_size must be > 0".into()));
        }
        for (i, name) in self.model_stages.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "model_stages[{i}] is empty"
                )));
            }
            if self.model_stages[..i].contains(name) {
                return Err(EngineError::Config(format!(
                    "model_stages lists '{name}' twice"
                )));
            }
        }
        Ok(())
    }

    pub fn cpu_filter(&self) -> CpuFilter {
        let filter = CpuFilter::new(self.cpu_mode);
        match self.cpu_seed {
            Some(seed) => filter.with_seed(seed),
            None => filter,
        }
    }

    /// Select a backend for one processor.
    pub fn backend_selection(&self) -> BackendSelection {
        let device = self.prefer_gpu.then(|| open_device(self.device));
        select_backend(device, || self.cpu_filter())
    }

    pub fn backend_factory(&self) -> BackendFactory {
        let config = self.clone();
        Arc::new(move || config.backend_selection())
    }

    /// Loader over `asset_dir`, when one is configured.
    pub fn stage_loader(&self) -> Option<Arc<dyn StageLoader>> {
        let dir = self.asset_dir.as_ref()?;
        let assets = Arc::new(DirectoryAssets::new(dir, MODEL_EXTENSION));
        Some(Arc::new(OnnxStageLoader::new(assets)))
    }

    pub fn interval_ticks(&self) -> Result<IntervalTicks> {
        IntervalTicks::new(self.refresh_hz)
    }

    pub fn session_deps(&self, surfaces: SurfaceFactory) -> SessionDeps {
        SessionDeps {
            backend: self.backend_factory(),
            surfaces,
            loader: self.stage_loader(),
            stage_names: self.model_stages.clone(),
            sample_size: self.sample_size,
            require_animated: self.require_animated,
        }
    }
}
