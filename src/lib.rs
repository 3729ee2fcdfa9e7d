// SPDX-License-Identifier: GPL-3.0-only

//! Attendance Scanner - camera-driven QR attendance capture
//!
//! This library provides exclusive camera arbitration, a per-scanner session
//! state machine, pluggable decode backends and duplicate-scan suppression.
//! Submitting attendance is left to an [`AttendanceSubmitter`] supplied by
//! the host.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`app`]: Session controller, debouncer, submission seam, frame analysis
//! - [`backends`]: Camera platforms, the camera arbiter and decode backends
//! - [`config`]: User configuration handling
//! - [`errors`]: Error taxonomy
//!
//! # Example
//!
//! ```ignore
//! let platform = get_platform_for_type(CameraPlatformType::V4l2, HostOrigin::parse("https://localhost"));
//! let arbiter = CameraResourceArbiter::new(platform, ArbiterConfig::default());
//! let backend = create_backend(DecodeBackendKind::Continuous, &options, Arc::new(QrDetector::new()));
//! let controller = ScanSessionController::new(arbiter, backend, submitter, observer, SessionConfig::default());
//! controller.set_active(true);
//! ```

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types
pub use app::frame_processor::{FrameDecoder, QrDetection, QrDetector};
pub use app::{
    AttendanceRecord, AttendanceSubmitter, ScanEventDebouncer, ScanSessionController, ScanState,
    SessionObserver,
};
pub use backends::camera::{CameraHandle, CameraResourceArbiter, Requestor};
pub use backends::decode::{DecodeBackend, DecodeBackendKind, create_backend};
pub use config::Config;
pub use errors::{CameraError, ScanError, SubmissionError};
