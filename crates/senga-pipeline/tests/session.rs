mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use senga_core::backend::BackendKind;
use senga_core::settings::{EnhancementSettings, Preset, SettingsPatch};
use senga_core::source::SourceId;
use senga_filters::{BackendSelection, CpuFilter, select_backend};
use senga_pipeline::{
    AttachOutcome, ClassificationReason, CycleOutcome, EnhancementSession, SessionDeps,
    SessionEvent, manual_ticks,
};

use support::{BackendLog, RecordingBackend, ScriptedSource, SurfaceLog};

const FILL: [u8; 4] = [120, 120, 120, 255];
const FRAME: Duration = Duration::from_millis(16);

struct Harness {
    surfaces: Arc<Mutex<Vec<(SourceId, SurfaceLog)>>>,
    backend_log: Arc<Mutex<BackendLog>>,
}

impl Harness {
    fn surface_for(&self, id: u64) -> SurfaceLog {
        self.surfaces
            .lock()
            .expect("surfaces lock")
            .iter()
            .find(|(sid, _)| *sid == SourceId(id))
            .map(|(_, log)| log.clone())
            .expect("surface created for source")
    }
}

fn session_with(require_animated: bool) -> (EnhancementSession, Harness) {
    let surfaces: Arc<Mutex<Vec<(SourceId, SurfaceLog)>>> = Arc::default();
    let backend_log: Arc<Mutex<BackendLog>> = Arc::default();

    let made = Arc::clone(&surfaces);
    let log = Arc::clone(&backend_log);
    let deps = SessionDeps {
        backend: Arc::new(move || RecordingBackend::with_log(Arc::clone(&log)).selection()),
        surfaces: Arc::new(move |id| {
            let surface = SurfaceLog::default();
            made.lock().expect("surfaces lock").push((id, surface.clone()));
            surface.surface()
        }),
        loader: None,
        stage_names: Vec::new(),
        sample_size: 16,
        require_animated,
    };
    let session = EnhancementSession::new(deps, EnhancementSettings::default());
    (
        session,
        Harness {
            surfaces,
            backend_log,
        },
    )
}

#[test]
fn attach_is_idempotent_per_source() {
    let (mut session, harness) = session_with(false);
    let (first, _) = ScriptedSource::playing(1, "file:///a.mp4", (2, 2), FILL);
    let (again, _) = ScriptedSource::playing(1, "file:///a.mp4", (2, 2), FILL);

    assert_eq!(session.attach(Box::new(first)), AttachOutcome::Attached);
    assert_eq!(session.attach(Box::new(again)), AttachOutcome::AlreadyAttached);
    assert_eq!(session.attached_count(), 1);
    assert_eq!(harness.surfaces.lock().expect("surfaces lock").len(), 1);
}

#[test]
fn settings_update_reaches_every_processor() {
    let (mut session, harness) = session_with(false);
    for id in [1, 2] {
        let (source, _) = ScriptedSource::playing(id, "file:///a.mp4", (2, 2), FILL);
        session.attach(Box::new(source));
    }

    let (_, mut ticks) = manual_ticks();
    session.tick(ticks.step(FRAME));
    let snapshot = session.update_settings(&SettingsPatch {
        edge_enhance: Some(0.2),
        ..SettingsPatch::default()
    });
    session.tick(ticks.step(FRAME));

    for id in [1, 2] {
        let processor = session.processor(SourceId(id)).expect("attached");
        assert!(Arc::ptr_eq(&processor.settings(), &snapshot));
    }
    let edges: Vec<f32> = harness
        .backend_log
        .lock()
        .expect("log")
        .renders
        .iter()
        .map(|s| s.edge_enhance)
        .collect();
    assert_eq!(edges, vec![0.8, 0.8, 0.2, 0.2]);
}

#[test]
fn preset_replaces_tunables_and_keeps_enabled_flag() {
    let (mut session, _) = session_with(false);
    session.set_enabled(false);
    let applied = session.apply_preset(Preset::OldAnime);

    let expected = EnhancementSettings {
        enabled: false,
        ..Preset::OldAnime.settings()
    };
    assert_eq!(*applied, expected);
}

#[test]
fn detach_stops_scheduling_that_source() {
    let (mut session, harness) = session_with(false);
    let (a, a_handle) = ScriptedSource::playing(1, "file:///a.mp4", (2, 2), FILL);
    let (b, b_handle) = ScriptedSource::playing(2, "file:///b.mp4", (2, 2), FILL);
    session.attach(Box::new(a));
    session.attach(Box::new(b));

    let (_, mut ticks) = manual_ticks();
    session.tick(ticks.step(FRAME));
    assert!(session.detach(SourceId(1)));
    assert!(!session.detach(SourceId(1)));
    let outcomes = session.tick(ticks.step(FRAME));

    assert_eq!(outcomes, vec![(SourceId(2), CycleOutcome::Rendered)]);
    assert_eq!(a_handle.captures(), 1);
    assert_eq!(b_handle.captures(), 2);
    assert_eq!(harness.surface_for(1).releases(), 1);
    assert_eq!(harness.surface_for(2).releases(), 0);
}

#[test]
fn anime_locator_is_classified_without_sampling() {
    let (mut session, _) = session_with(true);
    let (source, handle) =
        ScriptedSource::playing(9, "https://9anime.to/watch/episode-1", (8, 8), FILL);

    let outcome = session.on_source_eligible(Box::new(source), "");
    assert_eq!(outcome, AttachOutcome::Attached);
    assert_eq!(handle.captures(), 0);

    let status = session.status();
    let classification = status.sources[0].classification.expect("classified");
    assert!(classification.is_animated);
    assert_eq!(classification.reason, ClassificationReason::SourceLocator);
}

#[test]
fn flat_live_action_source_is_not_attached_when_required() {
    let (mut session, _) = session_with(true);
    let (source, handle) = ScriptedSource::playing(3, "https://example.com/vlog.mp4", (8, 8), FILL);

    let outcome = session.on_source_eligible(Box::new(source), "daily news");
    assert_eq!(outcome, AttachOutcome::NotEligible);
    assert_eq!(handle.captures(), 1);
    assert!(!session.is_attached(SourceId(3)));
}

#[test]
fn classification_is_cached_per_source() {
    let (mut session, _) = session_with(false);
    let (mut source, handle) = ScriptedSource::playing(4, "https://example.com/v.mp4", (8, 8), FILL);

    let first = session.classify(&mut source, "");
    let second = session.classify(&mut source, "");
    assert_eq!(first, second);
    assert_eq!(first.reason, ClassificationReason::PixelStatistics);
    assert_eq!(handle.captures(), 1);
}

#[test]
fn gpu_link_failure_is_final_for_the_session_processor() {
    let surfaces = SurfaceLog::default();
    let surface = surfaces.clone();
    let deps = SessionDeps {
        backend: Arc::new(|| -> BackendSelection {
            select_backend(
                Some(Err(senga_core::EngineError::Device("shader compile".into()))),
                || CpuFilter::settings_driven().with_seed(1),
            )
        }),
        surfaces: Arc::new(move |_| surface.surface()),
        loader: None,
        stage_names: Vec::new(),
        sample_size: 16,
        require_animated: false,
    };
    let mut session = EnhancementSession::new(deps, EnhancementSettings::default());
    let (source, _) = ScriptedSource::playing(5, "file:///a.mp4", (2, 2), FILL);
    session.attach(Box::new(source));

    let (_, mut ticks) = manual_ticks();
    session.tick(ticks.step(FRAME));
    session.apply_preset(Preset::HighQuality);
    session.tick(ticks.step(FRAME));

    let status = session.status();
    assert_eq!(status.sources[0].processor.backend, BackendKind::Cpu);
    assert!(status.sources[0].processor.backend_fault.is_some());
    assert_eq!(surfaces.presented().len(), 2);
}

#[tokio::test]
async fn run_applies_queued_events_before_ticks() {
    let (mut session, harness) = session_with(false);
    let (tx, mut rx) = mpsc::channel(8);
    let (source, handle) = ScriptedSource::playing(7, "file:///clip.mp4", (2, 2), FILL);
    let (status_tx, status_rx) = oneshot::channel();

    tx.send(SessionEvent::SourceEligible {
        source: Box::new(source),
        page_text: "Simulcast on Crunchyroll".into(),
    })
    .await
    .expect("send");
    tx.send(SessionEvent::UpdateSettings(SettingsPatch {
        sharpness: Some(0.4),
        ..SettingsPatch::default()
    }))
    .await
    .expect("send");
    tx.send(SessionEvent::Status(status_tx)).await.expect("send");

    let (clock, mut ticks) = manual_ticks();
    clock.advance(FRAME);
    clock.advance(FRAME);
    drop(clock);

    session.run(&mut ticks, &mut rx, &CancellationToken::new()).await;

    let status = status_rx.await.expect("status reply");
    assert_eq!(status.sources.len(), 1);
    assert_eq!(status.settings.sharpness, 0.4);
    assert_eq!(
        status.sources[0].classification.map(|c| c.reason),
        Some(ClassificationReason::PageText)
    );

    let sharpness: Vec<f32> = harness
        .backend_log
        .lock()
        .expect("log")
        .renders
        .iter()
        .map(|s| s.sharpness)
        .collect();
    assert_eq!(sharpness, vec![0.4, 0.4]);
    assert_eq!(handle.captures(), 2);
    assert_eq!(session.attached_count(), 0);
    assert_eq!(harness.surface_for(7).releases(), 1);
}

#[tokio::test]
async fn removed_source_event_detaches() {
    let (mut session, harness) = session_with(false);
    let (tx, mut rx) = mpsc::channel(8);
    let (source, handle) = ScriptedSource::playing(8, "file:///clip.mp4", (2, 2), FILL);
    tx.send(SessionEvent::SourceEligible {
        source: Box::new(source),
        page_text: String::new(),
    })
    .await
    .expect("send");
    tx.send(SessionEvent::SourceRemoved(SourceId(8))).await.expect("send");
    drop(tx);

    let (clock, mut ticks) = manual_ticks();
    clock.advance(FRAME);
    drop(clock);
    session.run(&mut ticks, &mut rx, &CancellationToken::new()).await;

    // One capture for classification, none for frame cycles.
    assert_eq!(handle.captures(), 1);
    assert!(harness.surface_for(8).presented().is_empty());
    assert_eq!(harness.surface_for(8).releases(), 1);
}
