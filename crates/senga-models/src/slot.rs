//! Non-blocking model stage slots.
//!
//! ```text
//!            spawn()                 poll(): Ok(stage)
//!   ──────────────────► Pending ─────────────────────► Loaded
//!                          │
//!                          │ poll(): Err(_) / loader task dropped
//!                          ▼
//!                        Absent  (terminal, never retried)
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use senga_core::backend::{EnhancementStage, StageLoader};
use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;
use senga_core::settings::EnhancementSettings;

use crate::DENOISE_STAGE;

type LoadResult = Result<Box<dyn EnhancementStage>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Pending,
    Loaded,
    Absent,
}

enum Inner {
    Pending(oneshot::Receiver<LoadResult>),
    Loaded(Box<dyn EnhancementStage>),
    Absent,
}

/// One named stage, loading or loaded.
pub struct ModelSlot {
    name: String,
    inner: Inner,
}

impl std::fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSlot")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ModelSlot {
    /// Start loading `name` on the current tokio runtime.
    ///
    /// Outside a runtime the slot is immediately absent.
    pub fn spawn(loader: Arc<dyn StageLoader>, name: &str) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(stage = name, "No async runtime; model stage disabled");
            return Self::absent(name);
        };
        let (tx, rx) = oneshot::channel();
        let owned = name.to_string();
        handle.spawn(async move {
            let result = loader.load(&owned).await;
            // Receiver dropped means the processor detached first.
            let _ = tx.send(result);
        });
        debug!(stage = name, "Model stage load started");
        Self {
            name: name.to_string(),
            inner: Inner::Pending(rx),
        }
    }

    pub fn loaded(stage: Box<dyn EnhancementStage>) -> Self {
        Self {
            name: stage.name().to_string(),
            inner: Inner::Loaded(stage),
        }
    }

    pub fn absent(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Inner::Absent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SlotState {
        match self.inner {
            Inner::Pending(_) => SlotState::Pending,
            Inner::Loaded(_) => SlotState::Loaded,
            Inner::Absent => SlotState::Absent,
        }
    }

    /// Check for load completion without waiting.
    pub fn poll(&mut self) -> SlotState {
        let Inner::Pending(rx) = &mut self.inner else {
            return self.state();
        };
        match rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(Ok(stage)) => {
                info!(stage = %self.name, "Model stage loaded");
                self.inner = Inner::Loaded(stage);
            }
            Ok(Err(err)) => {
                warn!(stage = %self.name, error = %err, code = err.error_code(), "Model stage failed to load; continuing without it");
                self.inner = Inner::Absent;
            }
            Err(TryRecvError::Closed) => {
                warn!(stage = %self.name, "Model stage loader exited without a result; continuing without it");
                self.inner = Inner::Absent;
            }
        }
        self.state()
    }

    pub fn stage_mut(&mut self) -> Option<&mut (dyn EnhancementStage + 'static)> {
        match &mut self.inner {
            Inner::Loaded(stage) => Some(stage.as_mut()),
            _ => None,
        }
    }

    /// Drop the stage or abandon the pending load.
    pub fn release(&mut self) {
        self.inner = Inner::Absent;
    }
}

/// When a loaded stage runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageGate {
    /// Every frame once loaded.
    Always,
    /// Only while `noise_reduction` is above the enable threshold.
    NoiseReduction,
}

impl StageGate {
    const ENABLE_THRESHOLD: f32 = 0.01;

    pub fn for_stage(name: &str) -> Self {
        if name == DENOISE_STAGE {
            Self::NoiseReduction
        } else {
            Self::Always
        }
    }

    pub fn is_open(self, settings: &EnhancementSettings) -> bool {
        match self {
            Self::Always => true,
            Self::NoiseReduction => settings.noise_reduction > Self::ENABLE_THRESHOLD,
        }
    }
}

/// Ordered set of slots owned by one processor.
#[derive(Debug, Default)]
pub struct StageChain {
    slots: Vec<(ModelSlot, StageGate)>,
}

impl StageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn one load per name, in order.
    pub fn spawn_all(loader: Arc<dyn StageLoader>, names: &[String]) -> Self {
        let slots = names
            .iter()
            .map(|name| {
                (
                    ModelSlot::spawn(Arc::clone(&loader), name),
                    StageGate::for_stage(name),
                )
            })
            .collect();
        Self { slots }
    }

    pub fn push(&mut self, slot: ModelSlot, gate: StageGate) {
        self.slots.push((slot, gate));
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn states(&self) -> Vec<(String, SlotState)> {
        self.slots
            .iter()
            .map(|(slot, _)| (slot.name().to_string(), slot.state()))
            .collect()
    }

    /// Poll every slot, then run each loaded stage whose gate is open.
    /// Returns `None` when nothing ran, so the caller keeps its own buffer.
    pub fn apply(
        &mut self,
        frame: &Frame,
        settings: &EnhancementSettings,
    ) -> Result<Option<Frame>> {
        let mut current: Option<Frame> = None;
        for (slot, gate) in &mut self.slots {
            slot.poll();
            if !gate.is_open(settings) {
                continue;
            }
            if let Some(stage) = slot.stage_mut() {
                let input = current.as_ref().unwrap_or(frame);
                let enhanced = stage.enhance(input).map_err(|err| match err {
                    EngineError::ModelInference { .. } => err,
                    other => EngineError::ModelInference {
                        name: stage.name().to_string(),
                        reason: other.to_string(),
                    },
                })?;
                current = Some(enhanced);
            }
        }
        Ok(current)
    }

    pub fn release(&mut self) {
        for (slot, _) in &mut self.slots {
            slot.release();
        }
    }
}
