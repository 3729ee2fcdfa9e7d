// SPDX-License-Identifier: GPL-3.0-only

//! Scan session controller
//!
//! One controller per mounted scanner. It drives the camera acquisition,
//! the decode backend and the debouncer, and reports to the host through a
//! [`SessionObserver`].
//!
//! Every acquisition attempt gets a new generation number. Async work
//! (acquisition, event pumping, the success pulse, submissions) carries the
//! generation it was started for and is discarded once the session has moved
//! on, so a slow permission prompt from an abandoned attempt can never touch
//! a newer one.
//!
//! All operations are non-blocking and must be called from within a Tokio
//! runtime.

use crate::app::debounce::ScanEventDebouncer;
use crate::app::state::{ScanSession, ScanState, StateUpdate};
use crate::app::submitter::{AttendanceRecord, AttendanceSubmitter, ScanEvent};
use crate::backends::camera::{CameraHandle, CameraResourceArbiter, Requestor};
use crate::backends::decode::{BackendEvent, DecodeBackend};
use crate::errors::{ScanError, SubmissionError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Host-facing callbacks
///
/// Called outside the controller's internal lock, so implementations may
/// call back into the controller.
pub trait SessionObserver: Send + Sync {
    fn on_state(&self, _update: &StateUpdate) {}
    fn on_scan(&self, _text: &str) {}
    fn on_error(&self, _error: &ScanError) {}
    fn on_recorded(&self, _record: &AttendanceRecord) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl SessionObserver for NullObserver {}

/// Controller settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long `Success` lasts before scanning resumes
    pub success_pulse: Duration,
    pub cooldown: Duration,
    pub prune_factor: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            success_pulse: crate::constants::DEFAULT_SUCCESS_PULSE,
            cooldown: crate::constants::DEFAULT_COOLDOWN,
            prune_factor: crate::constants::DEFAULT_PRUNE_FACTOR,
        }
    }
}

enum Note {
    State(StateUpdate),
    Scan(String),
    Error(ScanError),
}

struct Inner {
    session: ScanSession,
    /// Last value of the host's active input
    host_active: bool,
    backend: Box<dyn DecodeBackend>,
    handle: Option<CameraHandle>,
    debouncer: ScanEventDebouncer,
    attendance_session: Option<String>,
    /// Bumped on every success and teardown so only the latest pulse fires
    pulse_seq: u64,
}

struct Shared {
    owner: String,
    arbiter: CameraResourceArbiter,
    submitter: Arc<dyn AttendanceSubmitter>,
    observer: Arc<dyn SessionObserver>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    snapshots: watch::Sender<ScanSession>,
}

/// Per-scanner state machine
///
/// Not cloneable: exactly one owner drives it. Dropping the controller tears
/// the session down.
pub struct ScanSessionController {
    shared: Arc<Shared>,
}

impl ScanSessionController {
    pub fn new(
        arbiter: CameraResourceArbiter,
        backend: Box<dyn DecodeBackend>,
        submitter: Arc<dyn AttendanceSubmitter>,
        observer: Arc<dyn SessionObserver>,
        config: SessionConfig,
    ) -> Self {
        let session = ScanSession::new(backend.kind());
        let owner = format!("scanner-{}", session.id);
        info!(session = %session.id, backend = %session.backend_kind, "Creating scan session");
        let (snapshots, _) = watch::channel(session.clone());
        let debouncer = ScanEventDebouncer::new(config.cooldown, config.prune_factor);

        Self {
            shared: Arc::new(Shared {
                owner,
                arbiter,
                submitter,
                observer,
                config,
                inner: Mutex::new(Inner {
                    session,
                    host_active: false,
                    backend,
                    handle: None,
                    debouncer,
                    attendance_session: None,
                    pulse_seq: 0,
                }),
                snapshots,
            }),
        }
    }

    /// Current snapshot
    pub fn session(&self) -> ScanSession {
        self.shared.lock().session.clone()
    }

    pub fn state(&self) -> ScanState {
        self.shared.lock().session.state
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().session.generation
    }

    /// Receiver that sees every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<ScanSession> {
        self.shared.snapshots.subscribe()
    }

    /// Attendance session accepted scans are submitted against
    pub fn set_attendance_session(&self, session_id: Option<String>) {
        self.shared.lock().attendance_session = session_id;
    }

    /// The host's "is active" input
    pub fn set_active(&self, active: bool) {
        self.shared.lock().host_active = active;
        if active {
            self.activate();
        } else {
            self.teardown();
        }
    }

    /// Start acquiring. Only valid from `Idle`; a no-op otherwise.
    pub fn activate(&self) {
        Shared::activate(&self.shared);
    }

    /// Leave `Error` and, if the host still wants scanning, start over
    ///
    /// Returns false (and does nothing) outside `Error`.
    pub fn retry(&self) -> bool {
        let reactivate = {
            let mut inner = self.shared.lock();
            if inner.session.state != ScanState::Error {
                debug!(state = %inner.session.state, "Retry ignored");
                return false;
            }
            info!(session = %inner.session.id, "Retrying scan session");
            let note = self.shared.set_state(&mut inner, ScanState::Idle, None);
            let reactivate = inner.host_active;
            drop(inner);
            self.shared.emit(vec![note]);
            reactivate
        };
        if reactivate {
            self.activate();
        }
        true
    }

    /// Stop everything and return to `Idle`, from any state
    ///
    /// Never blocks: the camera is released in the background and any
    /// pending acquisition is discarded when it completes.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}

impl Drop for ScanSessionController {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, notes: Vec<Note>) {
        for note in notes {
            match note {
                Note::State(update) => self.observer.on_state(&update),
                Note::Scan(text) => self.observer.on_scan(&text),
                Note::Error(error) => self.observer.on_error(&error),
            }
        }
    }

    /// Change state and publish the snapshot; returns the observer note
    fn set_state(&self, inner: &mut Inner, state: ScanState, error: Option<ScanError>) -> Note {
        debug!(
            session = %inner.session.id,
            generation = inner.session.generation,
            from = %inner.session.state,
            to = %state,
            "Scan state change"
        );
        inner.session.state = state;
        self.snapshots.send_replace(inner.session.clone());
        Note::State(StateUpdate {
            state,
            error,
            generation: inner.session.generation,
        })
    }

    /// Enter `Error`, reporting through both `on_state` and `on_error`
    fn fail(&self, inner: &mut Inner, error: ScanError) -> Vec<Note> {
        warn!(session = %inner.session.id, kind = error.kind(), error = %error, "Scan session failed");
        vec![
            self.set_state(inner, ScanState::Error, Some(error.clone())),
            Note::Error(error),
        ]
    }

    fn is_current(inner: &Inner, generation: u64) -> bool {
        inner.session.generation == generation
    }

    fn release_later(&self, handle: CameraHandle) {
        let arbiter = self.arbiter.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { arbiter.release(handle).await });
            }
            // Without a runtime the handle's own drop cannot release either
            Err(_) => warn!(handle = %handle.id(), "No runtime to release camera handle"),
        }
    }

    /// Stop the backend and give back the handle
    fn stop_sources(&self, inner: &mut Inner) {
        inner.backend.stop();
        inner.session.active_device_id = None;
        if let Some(handle) = inner.handle.take() {
            if handle.is_revoked() {
                debug!(handle = %handle.id(), "Dropping preempted handle");
            } else {
                self.release_later(handle);
            }
        }
    }

    fn activate(self: &Arc<Self>) {
        let mut inner = self.lock();
        if inner.session.state != ScanState::Idle {
            debug!(state = %inner.session.state, "Activate ignored");
            return;
        }
        inner.session.generation += 1;
        let generation = inner.session.generation;
        info!(session = %inner.session.id, generation, "Activating scan session");
        let mut notes = vec![self.set_state(&mut inner, ScanState::Initializing, None)];

        if inner.backend.requires_camera() {
            let shared = Arc::clone(self);
            tokio::spawn(async move {
                let requestor = Requestor::new(shared.owner.clone(), generation);
                let result = shared.arbiter.acquire(requestor).await;
                shared.on_acquired(generation, result.map_err(ScanError::from)).await;
            });
        } else {
            // No camera involved: the backend starts right away
            notes.extend(self.start_backend(&mut inner, generation, None));
        }

        drop(inner);
        self.emit(notes);
    }

    /// Start the backend for `generation`, moving to `Scanning` or `Error`
    fn start_backend(
        self: &Arc<Self>,
        inner: &mut Inner,
        generation: u64,
        handle: Option<CameraHandle>,
    ) -> Vec<Note> {
        let mut handle = handle;
        let frames = handle.as_mut().and_then(|h| h.take_frames());
        let revocation = handle.as_ref().map(|h| h.revocation());
        let (sink, events) = mpsc::unbounded_channel();

        match inner.backend.start(frames, sink) {
            Ok(()) => {
                inner.session.active_device_id = handle.as_ref().map(|h| h.device().id.clone());
                inner.handle = handle;
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    shared.pump(generation, events, revocation).await;
                });
                info!(
                    session = %inner.session.id,
                    generation,
                    device = ?inner.session.active_device_id,
                    "Scanning"
                );
                vec![self.set_state(inner, ScanState::Scanning, None)]
            }
            Err(e) => {
                if let Some(handle) = handle {
                    self.release_later(handle);
                }
                self.fail(inner, e)
            }
        }
    }

    async fn on_acquired(self: &Arc<Self>, generation: u64, result: Result<CameraHandle, ScanError>) {
        let stale_handle = {
            let mut inner = self.lock();
            let current =
                Self::is_current(&inner, generation) && inner.session.state == ScanState::Initializing;
            if current {
                let notes = match result {
                    Ok(handle) => self.start_backend(&mut inner, generation, Some(handle)),
                    Err(e) => self.fail(&mut inner, e),
                };
                drop(inner);
                self.emit(notes);
                return;
            }
            debug!(generation, current = inner.session.generation, "Discarding stale acquisition");
            result.ok()
        };

        if let Some(handle) = stale_handle {
            self.arbiter.release(handle).await;
        }
    }

    /// Forward backend events for one generation until the source ends
    async fn pump(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<BackendEvent>,
        revocation: Option<watch::Receiver<bool>>,
    ) {
        let revoked = wait_revoked(revocation);
        tokio::pin!(revoked);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(BackendEvent::Decoded(text)) => self.on_decoded(generation, text),
                    Some(BackendEvent::Error(e)) if !e.is_fatal() => self.on_backend_notice(generation, e),
                    Some(BackendEvent::Error(e)) => {
                        self.on_source_failed(generation, e);
                        break;
                    }
                    Some(BackendEvent::StreamEnded) => {
                        self.on_source_failed(generation, ScanError::NoDevice);
                        break;
                    }
                    None => break,
                },
                _ = &mut revoked => {
                    self.on_preempted(generation);
                    break;
                }
            }
        }
        debug!(generation, "Event pump finished");
    }

    fn on_decoded(self: &Arc<Self>, generation: u64, text: String) {
        let mut inner = self.lock();
        if !Self::is_current(&inner, generation) {
            debug!(generation, "Ignoring decode from stale session");
            return;
        }
        // Typed input has no frame stream to pause, so it is taken during the pulse too
        let accepting = match inner.session.state {
            ScanState::Scanning => true,
            ScanState::Success => !inner.backend.requires_camera(),
            _ => false,
        };
        if !accepting {
            debug!(generation, state = %inner.session.state, "Ignoring decode outside scanning");
            // A single-shot backend disarmed itself for this code; the pulse rearms it in Success
            if inner.session.state != ScanState::Success {
                inner.backend.rearm();
            }
            return;
        }
        if !inner.debouncer.accept(&text, Instant::now()) {
            inner.backend.rearm();
            return;
        }

        inner.pulse_seq += 1;
        let pulse = inner.pulse_seq;
        let notes = vec![
            self.set_state(&mut inner, ScanState::Success, None),
            Note::Scan(text.clone()),
        ];
        let attendance_session = inner.attendance_session.clone();
        drop(inner);
        self.emit(notes);

        self.spawn_submission(generation, text, attendance_session);

        let shared = Arc::clone(self);
        let delay = self.config.success_pulse;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.end_pulse(generation, pulse);
        });
    }

    fn end_pulse(&self, generation: u64, pulse: u64) {
        let mut inner = self.lock();
        if !Self::is_current(&inner, generation)
            || inner.pulse_seq != pulse
            || inner.session.state != ScanState::Success
        {
            return;
        }
        inner.backend.rearm();
        let note = self.set_state(&mut inner, ScanState::Scanning, None);
        drop(inner);
        self.emit(vec![note]);
    }

    fn spawn_submission(self: &Arc<Self>, generation: u64, text: String, session_id: Option<String>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = match session_id {
                Some(session_id) => {
                    let event = ScanEvent::new(text, session_id);
                    debug!(code = %event.raw_text, session_id = %event.session_id, "Submitting scan");
                    shared
                        .submitter
                        .submit_scan(&event.raw_text, &event.session_id)
                        .await
                }
                None => Err(SubmissionError::NoActiveSession),
            };

            // Results for an abandoned generation are not the host's concern anymore
            if !Self::is_current(&shared.lock(), generation) {
                debug!(generation, "Dropping submission result for stale session");
                return;
            }
            match result {
                Ok(record) => shared.observer.on_recorded(&record),
                Err(e) => {
                    let error = ScanError::from(e);
                    warn!(kind = error.kind(), error = %error, "Attendance submission failed");
                    shared.observer.on_error(&error);
                }
            }
        });
    }

    /// A backend error that leaves the source running
    fn on_backend_notice(&self, generation: u64, error: ScanError) {
        if !error.is_reported() {
            trace!(kind = error.kind(), error = %error, "Backend notice");
            return;
        }
        if !Self::is_current(&self.lock(), generation) {
            return;
        }
        warn!(kind = error.kind(), error = %error, "Backend reported a non-fatal error");
        self.observer.on_error(&error);
    }

    fn on_source_failed(&self, generation: u64, error: ScanError) {
        let mut inner = self.lock();
        if !Self::is_current(&inner, generation) || !inner.session.state.is_live() {
            return;
        }
        if inner.handle.as_ref().is_some_and(|h| h.is_revoked()) {
            drop(inner);
            self.on_preempted(generation);
            return;
        }
        self.stop_sources(&mut inner);
        let notes = self.fail(&mut inner, error);
        drop(inner);
        self.emit(notes);
    }

    fn on_preempted(&self, generation: u64) {
        let mut inner = self.lock();
        if !Self::is_current(&inner, generation) || !inner.session.state.is_live() {
            return;
        }
        info!(session = %inner.session.id, generation, "Camera taken by another scanner");
        inner.pulse_seq += 1;
        self.stop_sources(&mut inner);
        let note = self.set_state(&mut inner, ScanState::Idle, None);
        drop(inner);
        self.emit(vec![note]);
    }

    fn teardown(&self) {
        let mut inner = self.lock();
        inner.session.generation += 1;
        inner.pulse_seq += 1;
        self.stop_sources(&mut inner);
        if inner.session.state == ScanState::Idle {
            self.snapshots.send_replace(inner.session.clone());
            return;
        }
        info!(session = %inner.session.id, from = %inner.session.state, "Tearing down scan session");
        let note = self.set_state(&mut inner, ScanState::Idle, None);
        drop(inner);
        self.emit(vec![note]);
    }
}

/// Resolves once the handle is revoked; never resolves without a handle
async fn wait_revoked(revocation: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = revocation else {
        return std::future::pending().await;
    };
    // The arbiter drops the sender when the handle is released normally
    if rx.wait_for(|revoked| *revoked).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::submitter::{AttendanceSubmitter, JsonLinesSubmitter};
    use crate::backends::camera::HostOrigin;
    use crate::backends::camera::arbiter::ArbiterConfig;
    use crate::backends::camera::virtual_camera::{FrameScript, VirtualPlatform};
    use crate::backends::decode::test_support::{TextDecoder, text_frame};
    use crate::backends::decode::{DecodeBackendKind, DecodeOptions, create_backend};

    fn controller(kind: DecodeBackendKind) -> (VirtualPlatform, ScanSessionController) {
        let platform = VirtualPlatform::new(HostOrigin::parse("https://localhost"));
        let arbiter = CameraResourceArbiter::new(Arc::new(platform.clone()), ArbiterConfig::default());
        let options = DecodeOptions {
            fps: 0,
            detection_box: None,
            ..Default::default()
        };
        let controller = ScanSessionController::new(
            arbiter,
            create_backend(kind, &options, Arc::new(TextDecoder)),
            Arc::new(JsonLinesSubmitter::new(Vec::new())),
            Arc::new(NullObserver),
            SessionConfig {
                success_pulse: Duration::from_millis(20),
                ..Default::default()
            },
        );
        (platform, controller)
    }

    async fn wait_state(controller: &ScanSessionController, state: ScanState) {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("controller gone");
    }

    #[tokio::test]
    async fn test_activate_only_from_idle() {
        let (platform, controller) = controller(DecodeBackendKind::Continuous);
        platform.attach_device("Front", FrameScript::default());
        controller.activate();
        assert_eq!(controller.state(), ScanState::Initializing);
        let generation = controller.generation();
        controller.activate();
        assert_eq!(controller.generation(), generation);
        wait_state(&controller, ScanState::Scanning).await;
        controller.teardown();
    }

    #[tokio::test]
    async fn test_retry_only_from_error() {
        let (_platform, controller) = controller(DecodeBackendKind::Continuous);
        assert!(!controller.retry());
        controller.set_active(true);
        wait_state(&controller, ScanState::Error).await;
        assert!(controller.retry());
        // Still active and still no camera: straight back to Error
        wait_state(&controller, ScanState::Error).await;
        assert!(controller.generation() >= 2);
    }

    #[tokio::test]
    async fn test_success_pulse_returns_to_scanning() {
        let (platform, controller) = controller(DecodeBackendKind::SingleShot);
        platform.attach_device(
            "Front",
            FrameScript::looped(vec![text_frame("STU-1")], Duration::from_millis(5)),
        );
        controller.set_active(true);
        wait_state(&controller, ScanState::Success).await;
        wait_state(&controller, ScanState::Scanning).await;
        controller.set_active(false);
        assert_eq!(controller.state(), ScanState::Idle);
    }

    /// Backend that reports non-fatal errors as soon as it starts
    struct NoisyBackend {
        running: bool,
    }

    impl DecodeBackend for NoisyBackend {
        fn kind(&self) -> DecodeBackendKind {
            DecodeBackendKind::ManualInput
        }

        fn start(
            &mut self,
            _source: Option<crate::backends::camera::FrameReceiver>,
            sink: crate::backends::decode::EventSink,
        ) -> Result<(), ScanError> {
            self.running = true;
            let _ = sink.send(BackendEvent::Error(ScanError::DecodeTransient("miss".into())));
            let _ = sink.send(BackendEvent::Error(ScanError::Submission("offline".into())));
            let _ = sink.send(BackendEvent::Decoded("STU-4".into()));
            Ok(())
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    #[derive(Default)]
    struct ErrorLog(Mutex<Vec<ScanError>>);

    impl SessionObserver for ErrorLog {
        fn on_error(&self, error: &ScanError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    #[tokio::test]
    async fn test_non_fatal_backend_errors_keep_scanning() {
        let platform = VirtualPlatform::new(HostOrigin::parse("https://localhost"));
        let arbiter = CameraResourceArbiter::new(Arc::new(platform), ArbiterConfig::default());
        let log = Arc::new(ErrorLog::default());
        let submitter = Arc::new(JsonLinesSubmitter::new(Vec::new()));
        let session = submitter.start_session("CS101").await.unwrap();
        let controller = ScanSessionController::new(
            arbiter,
            Box::new(NoisyBackend { running: false }),
            submitter,
            log.clone(),
            SessionConfig::default(),
        );
        controller.set_attendance_session(Some(session.id));
        controller.set_active(true);

        wait_state(&controller, ScanState::Success).await;
        let errors = log.0.lock().unwrap().clone();
        // Transient misses never reach the host
        assert_eq!(errors, vec![ScanError::Submission("offline".into())]);
    }
}
