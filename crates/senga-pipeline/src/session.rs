//! Composition root: one session table, many processors.
//!
//! The discovery collaborator reports eligible and removed sources, the
//! settings collaborator sends partial updates.  Both arrive as
//! [`SessionEvent`]s on one channel.  The session owns an explicit table
//! keyed by [`SourceId`]; attaching a source that is already in the table is
//! a no-op, so there is never more than one processor per live source.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use senga_core::backend::StageLoader;
use senga_core::settings::{EnhancementSettings, Preset, SettingsPatch};
use senga_core::source::{PresentSurface, SourceId, SourceSampler, VideoSource};
use senga_filters::BackendSelection;
use senga_models::StageChain;

use crate::classifier::{self, ClassificationResult};
use crate::processor::{CycleOutcome, FrameProcessor, ProcessorStatus};
use crate::scheduler::{Tick, TickSource};

/// Builds the backend for each new processor.
pub type BackendFactory = Arc<dyn Fn() -> BackendSelection + Send + Sync>;
/// Creates the output surface for a newly attached source.
pub type SurfaceFactory = Arc<dyn Fn(SourceId) -> Box<dyn PresentSurface> + Send + Sync>;

/// Collaborators and policy for a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub backend: BackendFactory,
    pub surfaces: SurfaceFactory,
    pub loader: Option<Arc<dyn StageLoader>>,
    pub stage_names: Vec<String>,
    pub sample_size: u32,
    /// Attach only sources classified as animated.
    pub require_animated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachOutcome {
    Attached,
    AlreadyAttached,
    /// Classified as not animated while `require_animated` is set.
    NotEligible,
}

/// Inbound collaborator messages.
pub enum SessionEvent {
    SourceEligible {
        source: Box<dyn VideoSource>,
        page_text: String,
    },
    SourceRemoved(SourceId),
    UpdateSettings(SettingsPatch),
    ApplyPreset(Preset),
    SetEnabled(bool),
    Status(oneshot::Sender<SessionStatus>),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceEligible { source, .. } => {
                f.debug_tuple("SourceEligible").field(&source.id()).finish()
            }
            Self::SourceRemoved(id) => f.debug_tuple("SourceRemoved").field(id).finish(),
            Self::UpdateSettings(p) => f.debug_tuple("UpdateSettings").field(p).finish(),
            Self::ApplyPreset(p) => f.debug_tuple("ApplyPreset").field(p).finish(),
            Self::SetEnabled(b) => f.debug_tuple("SetEnabled").field(b).finish(),
            Self::Status(_) => f.write_str("Status"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceStatus {
    #[serde(flatten)]
    pub processor: ProcessorStatus,
    pub locator: String,
    pub classification: Option<ClassificationResult>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub settings: EnhancementSettings,
    pub sources: Vec<SourceStatus>,
}

struct AttachedSource {
    processor: FrameProcessor,
}

pub struct EnhancementSession {
    deps: SessionDeps,
    settings: Arc<EnhancementSettings>,
    table: HashMap<SourceId, AttachedSource>,
    classifications: HashMap<SourceId, ClassificationResult>,
}

impl EnhancementSession {
    pub fn new(deps: SessionDeps, settings: EnhancementSettings) -> Self {
        Self {
            deps,
            settings: Arc::new(settings),
            table: HashMap::new(),
            classifications: HashMap::new(),
        }
    }

    pub fn settings(&self) -> Arc<EnhancementSettings> {
        Arc::clone(&self.settings)
    }

    pub fn is_attached(&self, id: SourceId) -> bool {
        self.table.contains_key(&id)
    }

    pub fn attached_count(&self) -> usize {
        self.table.len()
    }

    pub fn processor(&self, id: SourceId) -> Option<&FrameProcessor> {
        self.table.get(&id).map(|a| &a.processor)
    }

    pub fn processor_mut(&mut self, id: SourceId) -> Option<&mut FrameProcessor> {
        self.table.get_mut(&id).map(|a| &mut a.processor)
    }

    /// Classify `source` once; later calls for the same id hit the cache.
    pub fn classify(&mut self, source: &mut dyn VideoSource, page_text: &str) -> ClassificationResult {
        let id = source.id();
        if let Some(cached) = self.classifications.get(&id) {
            return *cached;
        }
        let locator = source.locator().to_string();
        let mut sampler = SourceSampler::new(source).with_default_size(self.deps.sample_size);
        let result = classifier::classify(&locator, page_text, &mut sampler);
        info!(source = %id, animated = result.is_animated, reason = ?result.reason, "Source classified");
        self.classifications.insert(id, result);
        result
    }

    /// Create a processor for `source` unless one already exists.
    #[instrument(skip_all, fields(source = %source.id()))]
    pub fn attach(&mut self, source: Box<dyn VideoSource>) -> AttachOutcome {
        let id = source.id();
        if self.table.contains_key(&id) {
            debug!("Source already enhanced; ignoring attach");
            return AttachOutcome::AlreadyAttached;
        }

        let selection = (self.deps.backend)();
        let stages = match &self.deps.loader {
            Some(loader) => StageChain::spawn_all(Arc::clone(loader), &self.deps.stage_names),
            None => StageChain::new(),
        };
        let surface = (self.deps.surfaces)(id);
        let mut processor =
            FrameProcessor::new(source, surface, selection, stages, Arc::clone(&self.settings));
        processor.start();
        self.table.insert(id, AttachedSource { processor });
        info!(attached = self.table.len(), "Source attached");
        AttachOutcome::Attached
    }

    /// Discovery entry point: classify, then attach.
    pub fn on_source_eligible(
        &mut self,
        mut source: Box<dyn VideoSource>,
        page_text: &str,
    ) -> AttachOutcome {
        if self.table.contains_key(&source.id()) {
            return AttachOutcome::AlreadyAttached;
        }
        let result = self.classify(source.as_mut(), page_text);
        if self.deps.require_animated && !result.is_animated {
            info!(source = %source.id(), "Source not animated; not attaching");
            return AttachOutcome::NotEligible;
        }
        self.attach(source)
    }

    /// Detach and forget a source.  Returns `false` if it was not attached.
    pub fn detach(&mut self, id: SourceId) -> bool {
        self.classifications.remove(&id);
        match self.table.remove(&id) {
            Some(mut attached) => {
                attached.processor.detach();
                info!(source = %id, attached = self.table.len(), "Source detached");
                true
            }
            None => false,
        }
    }

    pub fn detach_all(&mut self) {
        let ids: Vec<SourceId> = self.table.keys().copied().collect();
        for id in ids {
            self.detach(id);
        }
    }

    /// Merge `patch` into the session snapshot and hand the same snapshot
    /// to every live processor.
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Arc<EnhancementSettings> {
        self.settings = Arc::new(self.settings.merged(patch));
        for attached in self.table.values_mut() {
            attached.processor.replace_settings(Arc::clone(&self.settings));
        }
        debug!(settings = ?self.settings, "Settings updated");
        Arc::clone(&self.settings)
    }

    pub fn apply_preset(&mut self, preset: Preset) -> Arc<EnhancementSettings> {
        info!(%preset, "Applying preset");
        self.update_settings(&preset.patch())
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Arc<EnhancementSettings> {
        self.update_settings(&SettingsPatch {
            enabled: Some(enabled),
            ..SettingsPatch::default()
        })
    }

    /// Run one cycle on every attached processor.
    pub fn tick(&mut self, tick: Tick) -> Vec<(SourceId, CycleOutcome)> {
        self.table
            .iter_mut()
            .map(|(id, attached)| (*id, attached.processor.tick(tick)))
            .collect()
    }

    pub fn status(&self) -> SessionStatus {
        let mut sources: Vec<SourceStatus> = self
            .table
            .iter()
            .map(|(id, attached)| SourceStatus {
                processor: attached.processor.status(),
                locator: attached.processor.source().locator().to_string(),
                classification: self.classifications.get(id).copied(),
            })
            .collect();
        sources.sort_by_key(|s| s.processor.source);
        SessionStatus {
            settings: (*self.settings).clone(),
            sources,
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        debug!(?event, "Session event");
        match event {
            SessionEvent::SourceEligible { source, page_text } => {
                self.on_source_eligible(source, &page_text);
            }
            SessionEvent::SourceRemoved(id) => {
                self.detach(id);
            }
            SessionEvent::UpdateSettings(patch) => {
                self.update_settings(&patch);
            }
            SessionEvent::ApplyPreset(preset) => {
                self.apply_preset(preset);
            }
            SessionEvent::SetEnabled(enabled) => {
                self.set_enabled(enabled);
            }
            SessionEvent::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Serve events and ticks on one task until cancelled or the tick source
    /// ends.  Events queued before a tick are applied before that tick runs.
    /// Every processor is detached on exit.
    pub async fn run<T>(
        &mut self,
        ticks: &mut T,
        events: &mut mpsc::Receiver<SessionEvent>,
        cancel: &CancellationToken,
    ) where
        T: TickSource + ?Sized,
    {
        let mut events_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Session cancelled");
                    break;
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        debug!("Event channel closed; ticking only");
                        events_open = false;
                    }
                },
                tick = ticks.next_tick() => match tick {
                    Some(tick) => {
                        self.tick(tick);
                    }
                    None => {
                        debug!("Tick source exhausted");
                        break;
                    }
                },
            }
        }
        self.detach_all();
    }
}

impl Drop for EnhancementSession {
    fn drop(&mut self) {
        self.detach_all();
    }
}
