// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the scan session controller

mod common;

use attendance_scanner::AttendanceSubmitter;
use attendance_scanner::ScanError;
use attendance_scanner::ScanState;
use attendance_scanner::app::SessionConfig;
use attendance_scanner::backends::camera::HostOrigin;
use attendance_scanner::backends::camera::virtual_camera::FrameScript;
use attendance_scanner::backends::decode::DecodeBackendKind;
use common::*;
use std::time::Duration;

#[tokio::test]
async fn test_scan_records_attendance() {
    let platform = secure_platform();
    platform.attach_device(
        "Front",
        FrameScript::looped(vec![text_frame("STU-1")], Duration::from_millis(5)),
    );
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);
    let session = s.submitter.start_session("CS101").await.unwrap();
    s.controller.set_attendance_session(Some(session.id.clone()));

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Success).await;
    eventually(|| s.observer.records().len() == 1).await;

    let record = &s.observer.records()[0];
    assert_eq!(record.student, "STU-1");
    assert_eq!(record.subject_id, "CS101");

    // Held in front of the camera: one event per cooldown, not one per frame
    wait_state(&s.controller, ScanState::Scanning).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.observer.scans(), vec!["STU-1".to_string()]);

    s.controller.set_active(false);
    eventually(|| platform.active_streams() == 0).await;
}

#[tokio::test]
async fn test_rapid_toggling_never_opens_two_streams() {
    let platform = secure_platform();
    platform.attach_device("Front", FrameScript::default());
    platform.set_open_delay(Duration::from_millis(20));
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    for _ in 0..3 {
        s.controller.set_active(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        s.controller.set_active(false);
    }
    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Scanning).await;

    eventually(|| platform.active_streams() == 1).await;
    assert!(platform.max_concurrent_streams() <= 1);

    s.controller.set_active(false);
    eventually(|| platform.active_streams() == 0).await;
    assert!(!arbiter.is_held().await);
}

#[tokio::test]
async fn test_stale_acquisition_is_discarded() {
    let platform = secure_platform();
    platform.attach_device("Front", FrameScript::default());
    platform.set_open_delay(Duration::from_millis(100));
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    s.controller.activate();
    s.controller.teardown();
    assert_eq!(s.controller.state(), ScanState::Idle);
    s.controller.activate();
    let generation = s.controller.generation();

    wait_state(&s.controller, ScanState::Scanning).await;
    // Let the first acquisition complete and be thrown away
    tokio::time::sleep(Duration::from_millis(250)).await;

    let scanning: Vec<u64> = s
        .observer
        .states
        .lock()
        .unwrap()
        .iter()
        .filter(|u| u.state == ScanState::Scanning)
        .map(|u| u.generation)
        .collect();
    assert_eq!(scanning, vec![generation]);
    assert_eq!(s.controller.state(), ScanState::Scanning);
    assert_eq!(platform.active_streams(), 1);
    assert!(platform.max_concurrent_streams() <= 1);
}

#[tokio::test]
async fn test_permission_denied_then_retry() {
    let platform = secure_platform();
    platform.attach_device("Front", FrameScript::default());
    platform.set_permission(false);
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Error).await;
    assert!(matches!(s.observer.errors()[..], [ScanError::Permission(_)]));

    // No automatic retry
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(platform.permission_prompts(), 1);

    platform.set_permission(true);
    assert!(s.controller.retry());
    wait_state(&s.controller, ScanState::Scanning).await;
    assert_eq!(platform.permission_prompts(), 2);
}

#[tokio::test]
async fn test_insecure_context_never_prompts() {
    let platform = secure_platform();
    platform.attach_device("Front", FrameScript::default());
    platform.set_origin(HostOrigin::parse("http://scanner.example.edu"));
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Error).await;
    assert_eq!(s.observer.errors(), vec![ScanError::InsecureContext]);
    assert_eq!(platform.permission_prompts(), 0);
}

#[tokio::test]
async fn test_no_device_then_attach_and_retry() {
    let platform = secure_platform();
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Error).await;
    assert_eq!(s.observer.errors(), vec![ScanError::NoDevice]);

    platform.attach_device("USB", FrameScript::default());
    assert!(s.controller.retry());
    wait_state(&s.controller, ScanState::Scanning).await;
    assert_eq!(
        s.controller.session().active_device_id.as_deref(),
        Some("virtual:0")
    );
}

#[tokio::test]
async fn test_second_scanner_preempts_first() {
    let platform = secure_platform();
    platform.attach_device("Front", FrameScript::default());
    let arbiter = arbiter(&platform);
    let first = scanner(&arbiter, DecodeBackendKind::Continuous);
    let second = scanner(&arbiter, DecodeBackendKind::Continuous);

    first.controller.set_active(true);
    wait_state(&first.controller, ScanState::Scanning).await;

    second.controller.set_active(true);
    wait_state(&second.controller, ScanState::Scanning).await;
    wait_state(&first.controller, ScanState::Idle).await;

    assert!(first.observer.errors().is_empty());
    assert!(first.controller.session().active_device_id.is_none());
    assert!(platform.max_concurrent_streams() <= 1);
    eventually(|| platform.active_streams() == 1).await;
}

#[tokio::test]
async fn test_stream_end_reports_lost_device() {
    let platform = secure_platform();
    platform.attach_device(
        "Front",
        FrameScript::once(vec![text_frame("STU-7")], Duration::from_millis(5)),
    );
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Error).await;
    assert_eq!(s.observer.scans(), vec!["STU-7".to_string()]);
    assert!(s.observer.errors().contains(&ScanError::NoDevice));
    eventually(|| platform.active_streams() == 0).await;
}

#[tokio::test]
async fn test_submission_failure_keeps_scanning() {
    let platform = secure_platform();
    platform.attach_device(
        "Front",
        FrameScript::looped(vec![text_frame("STU-9")], Duration::from_millis(5)),
    );
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::Continuous);

    // No attendance session set
    s.controller.set_active(true);
    eventually(|| !s.observer.errors().is_empty()).await;
    assert!(matches!(s.observer.errors()[0], ScanError::Submission(_)));

    wait_state(&s.controller, ScanState::Scanning).await;
    assert!(!s.observer.states().contains(&ScanState::Error));
    assert!(s.observer.records().is_empty());
}

#[tokio::test]
async fn test_manual_input_skips_camera() {
    let platform = secure_platform();
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::ManualInput);
    let session = s.submitter.start_session("MATH2").await.unwrap();
    s.controller.set_attendance_session(Some(session.id));

    s.controller.set_active(true);
    assert_eq!(s.controller.state(), ScanState::Scanning);
    assert!(s.options.manual_input.submit("  STU-1 \n"));
    wait_state(&s.controller, ScanState::Success).await;
    wait_state(&s.controller, ScanState::Scanning).await;

    // Within the cooldown the repeat is dropped, a new code is not
    assert!(s.options.manual_input.submit("STU-1"));
    assert!(s.options.manual_input.submit("STU-2"));
    eventually(|| s.observer.records().len() == 2).await;

    assert_eq!(s.observer.scans(), vec!["STU-1".to_string(), "STU-2".to_string()]);
    assert_eq!(platform.permission_prompts(), 0);
    assert_eq!(platform.streams_opened(), 0);

    s.controller.set_active(false);
    assert!(!s.options.manual_input.submit("STU-3"));
}

#[tokio::test]
async fn test_dropping_controller_releases_camera() {
    let platform = secure_platform();
    platform.attach_device("Front", FrameScript::default());
    let arbiter = arbiter(&platform);
    let s = scanner(&arbiter, DecodeBackendKind::SingleShot);

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Scanning).await;
    assert_eq!(platform.active_streams(), 1);

    drop(s);
    eventually(|| platform.active_streams() == 0).await;
    assert!(!arbiter.is_held().await);
}

#[tokio::test]
async fn test_single_shot_resumes_after_rejected_repeat() {
    let platform = secure_platform();
    let frames = vec![
        text_frame("STU-1"),
        text_frame("STU-1"),
        text_frame("STU-1"),
        text_frame("STU-2"),
    ];
    platform.attach_device("Front", FrameScript::looped(frames, Duration::from_millis(5)));
    let arbiter = arbiter(&platform);
    // Pulse much shorter than the cooldown: repeats of STU-1 arrive while scanning
    let s = scanner(&arbiter, DecodeBackendKind::SingleShot);

    s.controller.set_active(true);
    eventually(|| s.observer.scans().len() == 2).await;
    assert_eq!(s.observer.scans(), vec!["STU-1".to_string(), "STU-2".to_string()]);
    assert!(s.observer.errors().iter().all(|e| matches!(e, ScanError::Submission(_))));
}

#[tokio::test]
async fn test_single_shot_held_code_fires_once_per_cooldown() {
    let platform = secure_platform();
    platform.attach_device(
        "Front",
        FrameScript::looped(vec![text_frame("STU-1")], Duration::from_millis(5)),
    );
    let arbiter = arbiter(&platform);
    let s = scanner_with(
        &arbiter,
        DecodeBackendKind::SingleShot,
        SessionConfig {
            success_pulse: Duration::from_millis(30),
            cooldown: Duration::from_millis(300),
            prune_factor: 5,
        },
    );

    s.controller.set_active(true);
    wait_state(&s.controller, ScanState::Success).await;
    assert_eq!(s.observer.scans().len(), 1);

    eventually(|| s.observer.scans().len() == 2).await;
    // The next acceptance is a full cooldown away
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(s.observer.scans(), vec!["STU-1".to_string(); 2]);
    assert_eq!(s.controller.state(), ScanState::Scanning);
}

#[tokio::test]
async fn test_manual_input_accepted_during_success_pulse() {
    let platform = secure_platform();
    let arbiter = arbiter(&platform);
    let s = scanner_with(
        &arbiter,
        DecodeBackendKind::ManualInput,
        SessionConfig {
            success_pulse: Duration::from_secs(5),
            ..session_config()
        },
    );
    let session = s.submitter.start_session("MATH2").await.unwrap();
    s.controller.set_attendance_session(Some(session.id));

    s.controller.set_active(true);
    assert!(s.options.manual_input.submit("STU-1"));
    wait_state(&s.controller, ScanState::Success).await;

    // Typed straight after the first one, well inside the pulse
    assert!(s.options.manual_input.submit("STU-2"));
    assert!(s.options.manual_input.submit("STU-1"));
    eventually(|| s.observer.records().len() == 2).await;

    assert_eq!(s.observer.scans(), vec!["STU-1".to_string(), "STU-2".to_string()]);
    assert!(s.observer.errors().is_empty());
    assert_eq!(s.controller.state(), ScanState::Success);
    s.controller.set_active(false);
}
