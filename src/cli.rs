// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! - `list`: enumerate cameras
//! - `diagnose`: secure context, devices and a permission probe
//! - `scan`: a live attendance session
//! - `decode`: decode image files through the virtual camera
//!
//! Human-readable status goes to stderr; stdout carries only the JSON lines
//! journal (for `scan`) or the decoded codes (for `decode`).

use attendance_scanner::app::frame_processor::QrDetector;
use attendance_scanner::app::{
    AttendanceRecord, AttendanceSubmitter, JsonLinesSubmitter, ScanSessionController, ScanState,
    SessionObserver, StateUpdate,
};
use attendance_scanner::backends::camera::arbiter::ArbiterConfig;
use attendance_scanner::backends::camera::virtual_camera::{
    FrameScript, VirtualPlatform, frames_from_images,
};
use attendance_scanner::backends::camera::{
    CameraResourceArbiter, HostOrigin, Requestor, get_platform_for_type,
};
use attendance_scanner::backends::decode::{
    BackendEvent, DecodeBackendKind, DecodeOptions, create_backend,
};
use attendance_scanner::config::Config;
use attendance_scanner::constants;
use attendance_scanner::errors::ScanError;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn arbiter_for(config: &Config) -> CameraResourceArbiter {
    let platform = get_platform_for_type(config.platform, config.host_origin());
    CameraResourceArbiter::new(platform, config.arbiter_config())
}

/// List all available cameras
pub fn list_cameras(config: &Config) -> CliResult {
    let rt = runtime()?;
    let arbiter = arbiter_for(config);
    let cameras = rt.block_on(arbiter.refresh_devices())?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for camera in &cameras {
        println!("  {}  {}", camera.id, camera.label);
        let caps = &camera.capabilities;
        if !caps.driver.is_empty() {
            println!("      Driver: {}", caps.driver);
        }
        if !caps.formats.is_empty() {
            let formats: Vec<&str> = caps.formats.iter().map(|f| f.pixel_format.as_str()).collect();
            println!("      Formats: {}", formats.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Walk through everything that has to be right for scanning to work
pub fn diagnose(config: &Config) -> CliResult {
    let rt = runtime()?;
    let arbiter = arbiter_for(config);
    let origin = config.host_origin();

    println!("Origin:    {} ({})", origin, if origin.is_secure() { "secure" } else { "INSECURE" });
    if !origin.is_secure() {
        println!("           Camera access needs HTTPS or a loopback host.");
    }
    println!(
        "Platform:  {} ({})",
        arbiter.platform().platform_type(),
        if arbiter.platform().is_available() { "available" } else { "unavailable" }
    );

    let devices = match rt.block_on(arbiter.refresh_devices()) {
        Ok(devices) => devices,
        Err(e) => {
            println!("Devices:   enumeration failed: {}", e);
            return Err(e.into());
        }
    };
    println!("Devices:   {}", devices.len());
    for device in &devices {
        println!("           {}", device);
    }

    print!("Access:    ");
    let outcome = rt.block_on(async {
        match arbiter.acquire(Requestor::new("diagnose", 0)).await {
            Ok(handle) => {
                let line = format!("granted on {} ({})", handle.device().label, handle.format());
                arbiter.release(handle).await;
                Ok(line)
            }
            Err(e) => Err(ScanError::from(e)),
        }
    });
    match outcome {
        Ok(line) => {
            println!("{}", line);
            Ok(())
        }
        Err(e) => {
            println!("{}", e);
            match &e {
                ScanError::Permission(_) => {
                    println!("           Check that your user can open the device (video group).")
                }
                ScanError::NoDevice => println!("           Connect a camera and try again."),
                _ => {}
            }
            Err(e.into())
        }
    }
}

/// Prints session progress to stderr and forwards state changes
struct ConsoleObserver {
    states: mpsc::UnboundedSender<StateUpdate>,
}

impl SessionObserver for ConsoleObserver {
    fn on_state(&self, update: &StateUpdate) {
        eprintln!("[{}]", update.state);
        let _ = self.states.send(update.clone());
    }

    fn on_scan(&self, text: &str) {
        eprintln!("Scanned: {}", text);
    }

    fn on_error(&self, error: &ScanError) {
        eprintln!("Error [{}]: {}", error.kind(), error);
    }

    fn on_recorded(&self, record: &AttendanceRecord) {
        eprintln!("Recorded {} as {}", record.student, record.status);
    }
}

/// Run a scanning session until Ctrl+C, end of input or a fatal error
pub fn scan(config: &Config, subject: &str, kind: DecodeBackendKind) -> CliResult {
    let rt = runtime()?;
    rt.block_on(run_scan(config, subject, kind))
}

async fn run_scan(config: &Config, subject: &str, kind: DecodeBackendKind) -> CliResult {
    let arbiter = arbiter_for(config);
    let options = config.decode_options();
    let manual_input = options.manual_input.clone();
    let decoder = Arc::new(QrDetector::with_max_dimension(config.max_decode_dimension));
    let backend = create_backend(kind, &options, decoder);

    let submitter = Arc::new(JsonLinesSubmitter::new(std::io::stdout()));
    let session = submitter.start_session(subject).await?;
    eprintln!("Attendance session {} for {}", session.id, session.subject_id);

    let (state_tx, mut states) = mpsc::unbounded_channel();
    let controller = ScanSessionController::new(
        arbiter.clone(),
        backend,
        Arc::clone(&submitter) as Arc<dyn AttendanceSubmitter>,
        Arc::new(ConsoleObserver { states: state_tx }),
        config.session_config(),
    );
    controller.set_attendance_session(Some(session.id.clone()));

    // Ctrl+C and end of stdin both end the session
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<&'static str>();
    let ctrlc_tx = stop_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send("interrupted");
    })?;

    if kind == DecodeBackendKind::ManualInput {
        eprintln!("Type or scan codes, one per line. Ctrl+D ends the session.");
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        manual_input.submit(&line);
                    }
                    Err(_) => break,
                }
            }
            let _ = stop_tx.send("end of input");
        });
    } else {
        eprintln!("Scanning... (press Ctrl+C to stop)");
    }

    controller.set_active(true);

    let mut failure: Option<ScanError> = None;
    loop {
        tokio::select! {
            reason = stop_rx.recv() => {
                eprintln!("Stopping: {}", reason.unwrap_or("shutdown"));
                break;
            }
            update = states.recv() => match update {
                Some(StateUpdate { state: ScanState::Error, error, .. }) => {
                    failure = error;
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    controller.set_active(false);
    drop(controller);
    // Make sure the device is closed before the process exits
    arbiter.shutdown().await;

    if let Err(e) = submitter.end_session(&session.id).await {
        eprintln!("Failed to end session: {}", e);
    }

    match failure {
        Some(e) => {
            if e.is_retryable() {
                eprintln!("Fix the problem above and run the scan again.");
            } else {
                eprintln!("Camera access needs HTTPS or a loopback origin (see --origin).");
            }
            Err(e.into())
        }
        None => Ok(()),
    }
}

/// Expand directories into the image files they contain
fn collect_images(paths: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| constants::file_formats::is_image(p))
                .collect();
            entries.sort();
            images.extend(entries);
        } else {
            images.push(path.clone());
        }
    }
    Ok(images)
}

/// Decode codes from image files, printing each one on stdout
pub fn decode_images(config: &Config, paths: &[PathBuf], first_only: bool) -> CliResult {
    let images = collect_images(paths)?;
    if images.is_empty() {
        return Err("No images to decode".into());
    }
    let rt = runtime()?;
    let codes = rt.block_on(decode_with_virtual_camera(config, &images, first_only))?;
    if codes.is_empty() {
        return Err("No QR code found".into());
    }
    for code in codes {
        println!("{}", code);
    }
    Ok(())
}

async fn decode_with_virtual_camera(
    config: &Config,
    images: &[PathBuf],
    first_only: bool,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let frames = frames_from_images(images)?;
    let platform = VirtualPlatform::new(HostOrigin::parse(constants::DEFAULT_ORIGIN));
    platform.attach_device(
        &label_for(images),
        FrameScript::once(frames, constants::virtual_camera::IMAGE_FRAME_INTERVAL),
    );
    let arbiter = CameraResourceArbiter::new(Arc::new(platform), ArbiterConfig::default());

    // Images are not camera frames: search the whole picture at every frame
    let options = DecodeOptions {
        fps: 0,
        detection_box: None,
        ..config.decode_options()
    };
    let kind = if first_only {
        DecodeBackendKind::SingleShot
    } else {
        DecodeBackendKind::Continuous
    };
    let decoder = Arc::new(QrDetector::with_max_dimension(config.max_decode_dimension));
    let mut backend = create_backend(kind, &options, decoder);

    let mut handle = arbiter.acquire(Requestor::new("decode", 1)).await?;
    let (sink, mut events) = mpsc::unbounded_channel();
    backend.start(handle.take_frames(), sink)?;

    let mut codes: Vec<String> = Vec::new();
    let collect = async {
        while let Some(event) = events.recv().await {
            match event {
                BackendEvent::Decoded(code) => {
                    if !codes.contains(&code) {
                        codes.push(code);
                    }
                    if first_only {
                        break;
                    }
                }
                BackendEvent::Error(e) => return Err(e),
                BackendEvent::StreamEnded => break,
            }
        }
        Ok(())
    };
    let outcome = tokio::time::timeout(constants::virtual_camera::DECODE_TIMEOUT, collect).await;

    backend.stop();
    arbiter.release(handle).await;

    match outcome {
        Ok(result) => result?,
        Err(_) => tracing::warn!("Timed out waiting for the virtual camera"),
    }
    Ok(codes)
}

fn label_for(images: &[PathBuf]) -> String {
    match images {
        [single] => Path::new(single)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string()),
        _ => format!("{} images", images.len()),
    }
}
