// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the scanner subsystem
//!
//! Three layers, from the hardware up:
//! - [`BackendError`](crate::backends::camera::BackendError): raw platform failures
//! - [`CameraError`]: what the arbiter reports from `acquire`
//! - [`ScanError`]: the taxonomy surfaced to the hosting UI

use crate::backends::camera::BackendError;
use std::fmt;

/// Errors returned by [`CameraResourceArbiter::acquire`](crate::backends::camera::CameraResourceArbiter::acquire)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The hosting context is not secure (not HTTPS or a loopback host)
    InsecureContext,
    /// Camera access was denied
    PermissionDenied(String),
    /// No camera devices were enumerated
    NoCameraFound,
    /// Any other failure while opening the stream
    Backend(String),
}

/// Scanner error taxonomy reported to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Fatal until the hosting context becomes secure
    InsecureContext,
    /// User denied camera access; recoverable via explicit retry
    Permission(String),
    /// No camera hardware; recoverable once a device is attached
    NoDevice,
    /// Decode backend failed to start or reported a fatal error
    BackendInit(String),
    /// Per-frame non-detection; logged only, never surfaced
    DecodeTransient(String),
    /// The attendance submitter rejected an event
    Submission(String),
}

impl ScanError {
    /// Whether this error moves the session into the `Error` state
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::InsecureContext
                | ScanError::Permission(_)
                | ScanError::NoDevice
                | ScanError::BackendInit(_)
        )
    }

    /// Whether an explicit user retry can possibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScanError::InsecureContext)
    }

    /// Whether the host should ever see this error
    pub fn is_reported(&self) -> bool {
        !matches!(self, ScanError::DecodeTransient(_))
    }

    /// Stable short identifier, used in logs and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::InsecureContext => "insecure_context",
            ScanError::Permission(_) => "permission",
            ScanError::NoDevice => "no_device",
            ScanError::BackendInit(_) => "backend_init",
            ScanError::DecodeTransient(_) => "decode_transient",
            ScanError::Submission(_) => "submission",
        }
    }
}

/// Errors returned by an [`AttendanceSubmitter`](crate::app::submitter::AttendanceSubmitter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The server refused the scan (unknown student, not enrolled, ...)
    Rejected(String),
    /// The request never reached the server
    Transport(String),
    /// No attendance session is open
    NoActiveSession,
}

/// Configuration loading/saving errors
#[derive(Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    Io(std::io::Error),
    /// The file contents are not valid configuration
    Parse(serde_json::Error),
    /// Values are present but unusable
    Invalid(String),
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::InsecureContext => {
                write!(f, "Camera access requires a secure context (HTTPS or localhost)")
            }
            CameraError::PermissionDenied(msg) => write!(f, "Camera access denied: {}", msg),
            CameraError::NoCameraFound => write!(f, "No camera devices found"),
            CameraError::Backend(msg) => write!(f, "Camera backend error: {}", msg),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::InsecureContext => {
                write!(f, "Camera access requires a secure context (HTTPS or localhost)")
            }
            ScanError::Permission(msg) => write!(f, "Camera permission denied: {}", msg),
            ScanError::NoDevice => write!(f, "No camera devices found"),
            ScanError::BackendInit(msg) => write!(f, "Failed to start scanner: {}", msg),
            ScanError::DecodeTransient(msg) => write!(f, "No code detected: {}", msg),
            ScanError::Submission(msg) => write!(f, "Failed to record attendance: {}", msg),
        }
    }
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionError::Rejected(msg) => write!(f, "Scan rejected: {}", msg),
            SubmissionError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SubmissionError::NoActiveSession => write!(f, "No active scanning session"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Configuration I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Configuration parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for CameraError {}
impl std::error::Error for ScanError {}
impl std::error::Error for SubmissionError {}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<CameraError> for ScanError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::InsecureContext => ScanError::InsecureContext,
            CameraError::PermissionDenied(msg) => ScanError::Permission(msg),
            CameraError::NoCameraFound => ScanError::NoDevice,
            CameraError::Backend(msg) => ScanError::BackendInit(msg),
        }
    }
}

impl From<BackendError> for CameraError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PermissionDenied(msg) => CameraError::PermissionDenied(msg),
            BackendError::DeviceNotFound(_) => CameraError::NoCameraFound,
            other => CameraError::Backend(other.to_string()),
        }
    }
}

impl From<SubmissionError> for ScanError {
    fn from(err: SubmissionError) -> Self {
        ScanError::Submission(err.to_string())
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}
