//! Per-source frame processor.
//!
//! # State machine
//!
//! ```text
//! Idle ──start()──► WaitingForReadyData ──data ready──► Running ──detach()──► Detached
//!   │                                                     ▲  │
//!   └──────────── start() with current data ──────────────┘  └─ tick(): capture → filter → stages → present
//! ```
//!
//! Paused and ended sources are checked per tick: the cycle does no work
//! and the next tick is still delivered, so playback resumes by itself.
//!
//! # Fault isolation
//!
//! A failing cycle is logged as a `FrameCycle` fault and counted; the
//! processor stays `Running`.  The previous enhanced frame stays on the
//! surface.
//!
//! # Settings
//!
//! The active snapshot is an `Arc<EnhancementSettings>`.  Each cycle clones
//! the `Arc` once at its start, so an update lands on the next cycle and
//! never on the one in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use senga_core::backend::{BackendKind, FilterBackend};
use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;
use senga_core::settings::{EnhancementSettings, SettingsPatch};
use senga_core::source::{PresentSurface, SourceId, VideoSource};
use senga_filters::BackendSelection;
use senga_models::{SlotState, StageChain};

use crate::scheduler::{Tick, TickSource, run_repeating};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Idle,
    WaitingForReadyData,
    Running,
    Detached,
}

/// What one tick did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Rendered,
    /// Enhancement disabled; the captured frame was presented as-is.
    PassedThrough,
    Paused,
    Ended,
    WaitingForData,
    Faulted,
    Detached,
}

/// Per-processor counters.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    pub ticks: AtomicU64,
    pub frames_rendered: AtomicU64,
    pub frames_skipped: AtomicU64,
    pub cycle_faults: AtomicU64,
    pub render_total_us: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    pub cycle_faults: u64,
    pub avg_render_us: u64,
}

impl ProcessorMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let rendered = self.frames_rendered.load(Ordering::Relaxed);
        let total_us = self.render_total_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            frames_rendered: rendered,
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            cycle_faults: self.cycle_faults.load(Ordering::Relaxed),
            avg_render_us: if rendered > 0 { total_us / rendered } else { 0 },
        }
    }

    pub fn report(&self, source: SourceId) {
        let s = self.snapshot();
        info!(
            %source,
            ticks = s.ticks,
            rendered = s.frames_rendered,
            skipped = s.frames_skipped,
            faults = s.cycle_faults,
            avg_render_us = s.avg_render_us,
            "Processor metrics"
        );
    }
}

/// Status for the `checkVideo`-style query.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessorStatus {
    pub source: SourceId,
    pub state: ProcessorState,
    pub backend: BackendKind,
    pub backend_name: String,
    pub backend_fault: Option<String>,
    /// Source resolution as `[width, height]`.
    pub surface_size: (u32, u32),
    pub stages: Vec<(String, SlotState)>,
    pub enabled: bool,
    pub metrics: MetricsSnapshot,
}

pub struct FrameProcessor {
    source: Box<dyn VideoSource>,
    surface: Box<dyn PresentSurface>,
    backend: Box<dyn FilterBackend>,
    backend_fault: Option<String>,
    stages: StageChain,
    settings: Arc<EnhancementSettings>,
    capture: Frame,
    output: Frame,
    presented_size: Option<(u32, u32)>,
    state: ProcessorState,
    metrics: Arc<ProcessorMetrics>,
}

impl FrameProcessor {
    /// Bind a source to a surface.  The backend in `selection` is final for
    /// the lifetime of the processor.
    pub fn new(
        source: Box<dyn VideoSource>,
        surface: Box<dyn PresentSurface>,
        selection: BackendSelection,
        stages: StageChain,
        settings: Arc<EnhancementSettings>,
    ) -> Self {
        let BackendSelection {
            backend,
            init_fault,
        } = selection;
        info!(
            source = %source.id(),
            backend = %backend.kind(),
            device = backend.name(),
            "Frame processor created"
        );
        Self {
            source,
            surface,
            backend,
            backend_fault: init_fault.map(|e| e.to_string()),
            stages,
            settings,
            capture: Frame::new(0, 0),
            output: Frame::new(0, 0),
            presented_size: None,
            state: ProcessorState::Idle,
            metrics: ProcessorMetrics::new(),
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.source.id()
    }

    pub fn source(&self) -> &dyn VideoSource {
        self.source.as_ref()
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn settings(&self) -> Arc<EnhancementSettings> {
        Arc::clone(&self.settings)
    }

    pub fn metrics(&self) -> Arc<ProcessorMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            source: self.source.id(),
            state: self.state,
            backend: self.backend.kind(),
            backend_name: self.backend.name().to_string(),
            backend_fault: self.backend_fault.clone(),
            surface_size: self.source.surface_size(),
            stages: self.stages.states(),
            enabled: self.settings.enabled,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Leave `Idle`.  Goes straight to `Running` when the source already has
    /// current data.
    pub fn start(&mut self) {
        if self.state != ProcessorState::Idle {
            return;
        }
        if self.source.ready_state().has_current_data() {
            self.state = ProcessorState::Running;
            info!(source = %self.source.id(), "Processor running");
        } else {
            self.state = ProcessorState::WaitingForReadyData;
            debug!(source = %self.source.id(), ready = ?self.source.ready_state(), "Waiting for ready data");
        }
    }

    /// The one-shot "data ready" signal.
    pub fn mark_data_ready(&mut self) {
        if self.state == ProcessorState::WaitingForReadyData {
            self.state = ProcessorState::Running;
            info!(source = %self.source.id(), "Data ready; processor running");
        }
    }

    /// Merge `patch` into the active snapshot.  Visible to the next cycle.
    pub fn update_settings(&mut self, patch: &SettingsPatch) -> Arc<EnhancementSettings> {
        self.settings = Arc::new(self.settings.merged(patch));
        Arc::clone(&self.settings)
    }

    /// Swap in a snapshot built elsewhere.
    pub fn replace_settings(&mut self, settings: Arc<EnhancementSettings>) {
        self.settings = settings;
    }

    /// Run one scheduling tick.
    pub fn tick(&mut self, tick: Tick) -> CycleOutcome {
        match self.state {
            ProcessorState::Detached => return CycleOutcome::Detached,
            ProcessorState::Idle => self.start(),
            _ => {}
        }
        if self.state == ProcessorState::WaitingForReadyData {
            if !self.source.ready_state().has_current_data() {
                return CycleOutcome::WaitingForData;
            }
            self.mark_data_ready();
        }

        self.metrics.ticks.fetch_add(1, Ordering::Relaxed);
        if self.source.is_ended() {
            self.metrics.frames_skipped.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::Ended;
        }
        if self.source.is_paused() {
            self.metrics.frames_skipped.fetch_add(1, Ordering::Relaxed);
            return CycleOutcome::Paused;
        }

        let settings = Arc::clone(&self.settings);
        match self.run_cycle(&settings, tick) {
            Ok(outcome) => outcome,
            Err(err) => {
                let err = err.into_cycle_fault();
                self.metrics.cycle_faults.fetch_add(1, Ordering::Relaxed);
                warn!(
                    source = %self.source.id(),
                    tick = tick.index,
                    error = %err,
                    code = err.error_code(),
                    "Frame cycle failed; skipping frame"
                );
                CycleOutcome::Faulted
            }
        }
    }

    fn run_cycle(&mut self, settings: &EnhancementSettings, tick: Tick) -> Result<CycleOutcome> {
        let (w, h) = self.source.surface_size();
        if w == 0 || h == 0 {
            return Err(EngineError::Capture(format!(
                "{} reports zero size {w}x{h}",
                self.source.id()
            )));
        }
        if self.capture.resize_to(w, h) {
            debug!(source = %self.source.id(), width = w, height = h, "Capture buffer resized");
        }
        self.source.capture(&mut self.capture)?;

        let started = Instant::now();
        let (outcome, staged) = if settings.enabled {
            self.backend
                .render(&self.capture, settings, tick.seconds(), &mut self.output)?;
            (CycleOutcome::Rendered, self.stages.apply(&self.output, settings)?)
        } else {
            self.output.resize_to(w, h);
            self.output.copy_from(&self.capture)?;
            (CycleOutcome::PassedThrough, None)
        };
        let frame = staged.as_ref().unwrap_or(&self.output);

        if self.presented_size != Some(frame.dimensions()) {
            let (fw, fh) = frame.dimensions();
            self.surface.resize(fw, fh)?;
            self.presented_size = Some((fw, fh));
            debug!(source = %self.source.id(), width = fw, height = fh, "Output surface resized");
        }
        self.surface.present(frame)?;

        self.metrics
            .render_total_us
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.metrics.frames_rendered.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Drive the processor from `ticks` until cancelled or the source of
    /// ticks ends, then detach.  Returns the number of ticks handled.
    #[instrument(skip_all, fields(source = %self.source.id()))]
    pub async fn run<T>(&mut self, ticks: &mut T, cancel: &CancellationToken) -> u64
    where
        T: TickSource + ?Sized,
    {
        self.start();
        if self.state == ProcessorState::WaitingForReadyData {
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                ready = self.source.data_ready() => Some(ready),
            };
            match ready {
                None => {
                    self.detach();
                    return 0;
                }
                Some(Ok(())) => self.mark_data_ready(),
                Some(Err(err)) => {
                    warn!(error = %err, "Data-ready wait failed; polling ready state per tick")
                }
            }
        }

        let handled = run_repeating(ticks, cancel, |tick| {
            self.tick(tick);
        })
        .await;
        self.detach();
        handled
    }

    /// Stop processing and release the backend, stages, surface and buffers.
    /// Terminal and idempotent.
    pub fn detach(&mut self) {
        if self.state == ProcessorState::Detached {
            return;
        }
        self.backend.release();
        self.stages.release();
        self.surface.release();
        self.capture = Frame::new(0, 0);
        self.output = Frame::new(0, 0);
        self.presented_size = None;
        self.state = ProcessorState::Detached;
        self.metrics.report(self.source.id());
        info!(source = %self.source.id(), "Processor detached");
    }
}

impl Drop for FrameProcessor {
    fn drop(&mut self) {
        self.detach();
    }
}
