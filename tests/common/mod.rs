// SPDX-License-Identifier: GPL-3.0-only

//! Shared fixtures for integration tests

#![allow(dead_code)]

use attendance_scanner::app::frame_processor::{DetectionBox, FrameRegion};
use attendance_scanner::app::{
    AttendanceRecord, JsonLinesSubmitter, ScanSessionController, ScanState, SessionConfig,
    SessionObserver, StateUpdate,
};
use attendance_scanner::backends::camera::arbiter::ArbiterConfig;
use attendance_scanner::backends::camera::virtual_camera::VirtualPlatform;
use attendance_scanner::backends::camera::{CameraFrame, CameraResourceArbiter, HostOrigin};
use attendance_scanner::backends::decode::{DecodeBackendKind, DecodeOptions, create_backend};
use attendance_scanner::{FrameDecoder, QrDetection, ScanError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Decoder that reads a gray frame's bytes as text; all-zero frames hold no code
pub struct TextDecoder;

impl FrameDecoder for TextDecoder {
    fn decode(&self, frame: &CameraFrame, _region: Option<&DetectionBox>) -> Vec<QrDetection> {
        let luma = frame.luma();
        if luma.iter().all(|&b| b == 0) {
            return Vec::new();
        }
        vec![QrDetection::new(
            FrameRegion::from_pixels(0, 0, frame.width, frame.height, frame.width, frame.height),
            String::from_utf8_lossy(&luma).to_string(),
        )]
    }
}

pub fn text_frame(text: &str) -> CameraFrame {
    CameraFrame::gray(text.len() as u32, 1, text.as_bytes().to_vec())
}

/// Observer that keeps everything it is told
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<StateUpdate>>,
    pub scans: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<ScanError>>,
    pub records: Mutex<Vec<AttendanceRecord>>,
}

impl RecordingObserver {
    pub fn scans(&self) -> Vec<String> {
        self.scans.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ScanError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ScanState> {
        self.states.lock().unwrap().iter().map(|u| u.state).collect()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_state(&self, update: &StateUpdate) {
        self.states.lock().unwrap().push(update.clone());
    }

    fn on_scan(&self, text: &str) {
        self.scans.lock().unwrap().push(text.to_string());
    }

    fn on_error(&self, error: &ScanError) {
        self.errors.lock().unwrap().push(error.clone());
    }

    fn on_recorded(&self, record: &AttendanceRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

pub fn secure_platform() -> VirtualPlatform {
    VirtualPlatform::new(HostOrigin::parse("https://localhost"))
}

pub fn arbiter(platform: &VirtualPlatform) -> CameraResourceArbiter {
    CameraResourceArbiter::new(
        Arc::new(platform.clone()),
        ArbiterConfig {
            drain_grace: Duration::from_millis(200),
            ..Default::default()
        },
    )
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        success_pulse: Duration::from_millis(30),
        cooldown: Duration::from_secs(2),
        prune_factor: 5,
    }
}

pub struct Scanner {
    pub controller: ScanSessionController,
    pub observer: Arc<RecordingObserver>,
    pub submitter: Arc<JsonLinesSubmitter<Vec<u8>>>,
    pub options: DecodeOptions,
}

/// A controller on `arbiter` with a recording observer and a journal in memory
pub fn scanner(arbiter: &CameraResourceArbiter, kind: DecodeBackendKind) -> Scanner {
    scanner_with(arbiter, kind, session_config())
}

pub fn scanner_with(
    arbiter: &CameraResourceArbiter,
    kind: DecodeBackendKind,
    config: SessionConfig,
) -> Scanner {
    let options = DecodeOptions {
        fps: 0,
        detection_box: None,
        ..Default::default()
    };
    let observer = Arc::new(RecordingObserver::default());
    let submitter = Arc::new(JsonLinesSubmitter::new(Vec::new()));
    let controller = ScanSessionController::new(
        arbiter.clone(),
        create_backend(kind, &options, Arc::new(TextDecoder)),
        submitter.clone(),
        observer.clone(),
        config,
    );
    Scanner {
        controller,
        observer,
        submitter,
        options,
    }
}

pub async fn wait_state(controller: &ScanSessionController, state: ScanState) {
    let mut rx = controller.subscribe();
    tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .expect("controller dropped");
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
