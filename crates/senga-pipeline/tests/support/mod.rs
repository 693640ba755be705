//! Test doubles shared by the pipeline integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use senga_core::backend::{BackendKind, EnhancementStage, FilterBackend, StageLoader};
use senga_core::error::{EngineError, Result};
use senga_core::frame::Frame;
use senga_core::settings::EnhancementSettings;
use senga_core::source::{PresentSurface, ReadyState, SourceId, VideoSource};
use senga_filters::BackendSelection;

// ─── Video source ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SourceState {
    pub ready: ReadyState,
    pub paused: bool,
    pub ended: bool,
    pub native: Option<(u32, u32)>,
    pub display: (u32, u32),
    pub fill: [u8; 4],
    pub captures: usize,
    pub fail_capture: bool,
}

/// Test-side handle onto a [`ScriptedSource`].
#[derive(Clone)]
pub struct SourceHandle {
    state: Arc<Mutex<SourceState>>,
    ready: Arc<Notify>,
}

impl SourceHandle {
    pub fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().expect("source state lock")
    }

    pub fn set_ready(&self) {
        self.lock().ready = ReadyState::HaveEnoughData;
        self.ready.notify_one();
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn set_ended(&self, ended: bool) {
        self.lock().ended = ended;
    }

    pub fn set_native(&self, native: Option<(u32, u32)>) {
        self.lock().native = native;
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.lock().fail_capture = fail;
    }

    pub fn captures(&self) -> usize {
        self.lock().captures
    }
}

pub struct ScriptedSource {
    id: SourceId,
    locator: String,
    handle: SourceHandle,
}

impl ScriptedSource {
    /// A playing source with current data, filled with `fill`.
    pub fn playing(id: u64, locator: &str, size: (u32, u32), fill: [u8; 4]) -> (Self, SourceHandle) {
        Self::build(id, locator, ReadyState::HaveEnoughData, size, fill)
    }

    /// A source that has only loaded metadata.
    pub fn loading(id: u64, locator: &str, size: (u32, u32), fill: [u8; 4]) -> (Self, SourceHandle) {
        Self::build(id, locator, ReadyState::HaveMetadata, size, fill)
    }

    fn build(
        id: u64,
        locator: &str,
        ready: ReadyState,
        size: (u32, u32),
        fill: [u8; 4],
    ) -> (Self, SourceHandle) {
        let handle = SourceHandle {
            state: Arc::new(Mutex::new(SourceState {
                ready,
                paused: false,
                ended: false,
                native: Some(size),
                display: size,
                fill,
                captures: 0,
                fail_capture: false,
            })),
            ready: Arc::new(Notify::new()),
        };
        let source = Self {
            id: SourceId(id),
            locator: locator.to_string(),
            handle: handle.clone(),
        };
        (source, handle)
    }
}

#[async_trait]
impl VideoSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn ready_state(&self) -> ReadyState {
        self.handle.lock().ready
    }

    fn is_paused(&self) -> bool {
        self.handle.lock().paused
    }

    fn is_ended(&self) -> bool {
        self.handle.lock().ended
    }

    fn native_size(&self) -> Option<(u32, u32)> {
        self.handle.lock().native
    }

    fn display_size(&self) -> (u32, u32) {
        self.handle.lock().display
    }

    fn capture(&mut self, frame: &mut Frame) -> Result<()> {
        let mut state = self.handle.lock();
        state.captures += 1;
        if state.fail_capture {
            return Err(EngineError::Capture("decoder stalled".into()));
        }
        for px in frame.as_bytes_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&state.fill);
        }
        Ok(())
    }

    async fn data_ready(&mut self) -> Result<()> {
        loop {
            let ready = self.handle.lock().ready.has_current_data();
            if ready {
                return Ok(());
            }
            self.handle.ready.notified().await;
        }
    }
}

// ─── Surface ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceCall {
    Resize(u32, u32),
    Present(Frame),
    Release,
}

#[derive(Clone, Default)]
pub struct SurfaceLog(Arc<Mutex<Vec<SurfaceCall>>>);

impl SurfaceLog {
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.0.lock().expect("surface log lock").clone()
    }

    pub fn presented(&self) -> Vec<Frame> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SurfaceCall::Present(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    pub fn releases(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, SurfaceCall::Release))
            .count()
    }

    pub fn surface(&self) -> Box<dyn PresentSurface> {
        Box::new(RecordingSurface(self.clone()))
    }

    fn push(&self, call: SurfaceCall) {
        self.0.lock().expect("surface log lock").push(call);
    }
}

pub struct RecordingSurface(SurfaceLog);

impl PresentSurface for RecordingSurface {
    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.0.push(SurfaceCall::Resize(width, height));
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        self.0.push(SurfaceCall::Present(frame.clone()));
        Ok(())
    }

    fn release(&mut self) {
        self.0.push(SurfaceCall::Release);
    }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct BackendLog {
    /// Settings snapshot seen by each render call.
    pub renders: Vec<EnhancementSettings>,
    /// Render call indices that fail.
    pub fail_on: Vec<usize>,
    pub releases: usize,
}

/// Copies input to output and records every call.
pub struct RecordingBackend {
    log: Arc<Mutex<BackendLog>>,
}

impl RecordingBackend {
    pub fn new() -> (Self, Arc<Mutex<BackendLog>>) {
        let log = Arc::new(Mutex::new(BackendLog::default()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }

    pub fn with_log(log: Arc<Mutex<BackendLog>>) -> Self {
        Self { log }
    }

    pub fn selection(self) -> BackendSelection {
        BackendSelection {
            backend: Box::new(self),
            init_fault: None,
        }
    }
}

impl FilterBackend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn render(
        &mut self,
        input: &Frame,
        settings: &EnhancementSettings,
        _time: f32,
        output: &mut Frame,
    ) -> Result<()> {
        let mut log = self.log.lock().expect("backend log lock");
        let call = log.renders.len();
        log.renders.push(settings.clone());
        if log.fail_on.contains(&call) {
            return Err(EngineError::Device(format!("draw {call} lost context")));
        }
        output.resize_to(input.width(), input.height());
        output.copy_from(input)
    }

    fn release(&mut self) {
        self.log.lock().expect("backend log lock").releases += 1;
    }
}

// ─── Model stages ────────────────────────────────────────────────────────────

/// Inverts RGB.
pub struct InvertStage(pub String);

impl EnhancementStage for InvertStage {
    fn name(&self) -> &str {
        &self.0
    }

    fn enhance(&mut self, frame: &Frame) -> Result<Frame> {
        let mut out = frame.clone();
        for px in out.as_bytes_mut().chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = 255 - *c;
            }
        }
        Ok(out)
    }
}

/// Holds every load until `release` is notified.
pub struct GatedLoader {
    pub release: Arc<Notify>,
}

#[async_trait]
impl StageLoader for GatedLoader {
    async fn load(&self, name: &str) -> Result<Box<dyn EnhancementStage>> {
        self.release.notified().await;
        Ok(Box::new(InvertStage(name.to_string())))
    }
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
