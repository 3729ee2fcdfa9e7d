// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera platform abstraction

//! Shared types for camera platforms

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Camera platform type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CameraPlatformType {
    /// Video4Linux2 devices under /dev/video*
    #[default]
    V4l2,
    /// Scripted in-process camera (image files, tests)
    Virtual,
}

impl std::fmt::Display for CameraPlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraPlatformType::V4l2 => write!(f, "V4L2"),
            CameraPlatformType::Virtual => write!(f, "virtual"),
        }
    }
}

/// What a device reports it can do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Driver name (V4L2 driver, or "virtual")
    pub driver: String,
    /// Capture formats the device advertised at enumeration time
    pub formats: Vec<CameraFormat>,
    /// True if the device supports streaming capture
    pub supports_streaming: bool,
}

/// An enumerated camera device
///
/// Read-only snapshot; call
/// [`CameraResourceArbiter::refresh_devices`](super::CameraResourceArbiter::refresh_devices)
/// to get a fresh list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Stable identifier (device path for V4L2)
    pub id: String,
    /// Human readable name
    pub label: String,
    pub capabilities: DeviceCapabilities,
}

impl std::fmt::Display for CameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    /// Get the framerate as a floating point value
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Get the rounded-down integer framerate
    pub fn as_int(&self) -> u32 {
        self.num / self.denom
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// Camera format specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFormat {
    pub width: u32,
    pub height: u32,
    pub framerate: Option<Framerate>,
    pub pixel_format: String, // FourCC code (e.g., "YUYV", "GREY")
}

impl std::fmt::Display for CameraFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(fps) = &self.framerate {
            write!(
                f,
                "{}x{} @ {}fps {}",
                self.width, self.height, fps, self.pixel_format
            )
        } else {
            write!(f, "{}x{} {}", self.width, self.height, self.pixel_format)
        }
    }
}

/// Requested stream parameters, derived from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Ideal capture width
    pub width: u32,
    /// Ideal capture height
    pub height: u32,
    /// Target capture rate
    pub framerate: Framerate,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            width: crate::constants::capture::WIDTH,
            height: crate::constants::capture::HEIGHT,
            framerate: Framerate::from_int(crate::constants::capture::FRAMERATE),
        }
    }
}

/// Pixel format for camera frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit luma only (1 byte per pixel)
    Gray8,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    Yuyv,
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    Rgba,
}

impl PixelFormat {
    /// Bytes used by one pixel in a packed row
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Yuyv => 2,
            PixelFormat::Rgba => 4,
        }
    }
}

/// A single frame from the camera
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Row stride in bytes (may include padding)
    pub stride: u32,
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Create a tightly packed 8-bit grayscale frame
    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::from(data),
            format: PixelFormat::Gray8,
            stride: width,
            captured_at: Instant::now(),
        }
    }

    /// Extract the luma plane, tightly packed (`width * height` bytes)
    ///
    /// Rows shorter than the stride claims are zero-filled rather than
    /// rejected, so a truncated buffer still yields a frame of the right size.
    pub fn luma(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let stride = self.stride as usize;
        let bpp = self.format.bytes_per_pixel();

        let mut out = vec![0u8; width * height];
        for y in 0..height {
            let row_start = y * stride;
            let row_end = (row_start + width * bpp).min(self.data.len());
            if row_start >= row_end {
                break;
            }
            let row = &self.data[row_start..row_end];
            let dst = &mut out[y * width..(y + 1) * width];
            match self.format {
                PixelFormat::Gray8 => dst[..row.len()].copy_from_slice(row),
                PixelFormat::Yuyv => {
                    for (x, px) in row.chunks_exact(2).enumerate() {
                        dst[x] = px[0];
                    }
                }
                PixelFormat::Rgba => {
                    for (x, px) in row.chunks_exact(4).enumerate() {
                        let l = (px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114)
                            / 1000;
                        dst[x] = l as u8;
                    }
                }
            }
        }
        out
    }
}

/// Origin of the hosting context, used for the secure-context check
///
/// Camera access is only granted to secure contexts: `https` origins, or
/// any scheme on a loopback host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOrigin {
    pub scheme: String,
    pub host: String,
}

impl HostOrigin {
    /// Parse an origin such as `https://scanner.example.edu:8443`
    ///
    /// Input without a scheme is treated as a bare host with scheme `http`.
    pub fn parse(origin: &str) -> Self {
        let origin = origin.trim();
        let (scheme, rest) = origin.split_once("://").unwrap_or(("http", origin));
        let authority = rest.split('/').next().unwrap_or("");
        let authority = authority.rsplit('@').next().unwrap_or(authority);
        let host = if let Some(stripped) = authority.strip_prefix('[') {
            // IPv6 literal: [::1]:3000
            stripped.split(']').next().unwrap_or("").to_string()
        } else {
            authority.split(':').next().unwrap_or("").to_string()
        };
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
        }
    }

    /// Whether camera access may be requested from this origin
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss" | "file")
            || self.host == "localhost"
            || self.host.ends_with(".localhost")
            || self.host == "::1"
            || self.host.starts_with("127.")
    }
}

impl std::fmt::Display for HostOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Frame receiver type for camera streams
pub type FrameReceiver = futures::channel::mpsc::Receiver<CameraFrame>;

/// Frame sender type for camera streams
pub type FrameSender = futures::channel::mpsc::Sender<CameraFrame>;

/// Result type for platform operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Platform errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Platform is not available on this system
    NotAvailable(String),
    /// Access to the device was refused
    PermissionDenied(String),
    /// Camera device not found
    DeviceNotFound(String),
    /// Device is held by another process
    Busy(String),
    /// Format not supported
    FormatNotSupported(String),
    /// Capture thread died
    Crashed(String),
    /// General I/O error
    IoError(String),
    /// Other errors
    Other(String),
}

impl BackendError {
    /// Classify an I/O error raised while opening `path`
    pub fn from_io(path: &str, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return BackendError::PermissionDenied(format!("{}: {}", path, err));
        }
        match err.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => {
                BackendError::PermissionDenied(format!("{}: {}", path, err))
            }
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
                BackendError::DeviceNotFound(format!("{}: {}", path, err))
            }
            Some(libc::EBUSY) => BackendError::Busy(format!("{}: {}", path, err)),
            _ => BackendError::IoError(format!("{}: {}", path, err)),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Platform not available: {}", msg),
            BackendError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::Busy(msg) => write!(f, "Device busy: {}", msg),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::Crashed(msg) => write!(f, "Capture crashed: {}", msg),
            BackendError::IoError(msg) => write!(f, "I/O error: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}
