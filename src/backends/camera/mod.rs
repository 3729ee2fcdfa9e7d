// SPDX-License-Identifier: GPL-3.0-only

//! Camera platform abstraction and exclusive arbitration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │ ScanSessionController(s)│
//! └────────────┬────────────┘
//!              │ acquire / release
//!              ▼
//! ┌─────────────────────────┐
//! │  CameraResourceArbiter  │  ← one outstanding handle, preempt-with-drain
//! └────────────┬────────────┘
//!              │
//!              ▼
//! ┌─────────────────────────┐
//! │  CameraPlatform trait   │  ← enumerate, open, stop
//! └────────────┬────────────┘
//!              │
//!        ┌─────┴──────┐
//!        ▼            ▼
//!   ┌────────┐   ┌─────────┐
//!   │  V4L2  │   │ Virtual │
//!   └────────┘   └─────────┘
//! ```
//!
//! Nothing outside this module talks to camera hardware; scanners only ever
//! see a [`CameraHandle`] and the frame receiver the arbiter hands them.

pub mod arbiter;
pub mod capture_thread;
pub mod types;
pub mod v4l2;
pub mod virtual_camera;

pub use arbiter::{CameraHandle, CameraResourceArbiter, HandleId, Requestor};
pub use types::*;

use futures::future::BoxFuture;
use std::sync::Arc;

/// A running capture stream on one device
///
/// Owned by the arbiter; scanners never hold a stream directly.
pub trait CameraStream: Send {
    /// Device this stream captures from
    fn device(&self) -> &CameraDevice;

    /// Format negotiated with the device
    fn format(&self) -> &CameraFormat;

    /// Take the frame receiver. Returns `None` after the first call.
    fn take_frames(&mut self) -> Option<FrameReceiver>;

    /// Stop capturing and release the device
    ///
    /// The returned future resolves once the device has been fully released.
    /// Calling `stop` again after that resolves immediately.
    fn stop(&mut self) -> BoxFuture<'static, BackendResult<()>>;
}

/// Camera hardware access
pub trait CameraPlatform: Send + Sync {
    /// Platform identifier
    fn platform_type(&self) -> CameraPlatformType;

    /// Origin of the hosting context, for the secure-context check
    fn origin(&self) -> HostOrigin;

    /// Check if this platform can be used on the current system
    fn is_available(&self) -> bool;

    /// Enumerate video capture devices
    fn enumerate_cameras(&self) -> BoxFuture<'_, BackendResult<Vec<CameraDevice>>>;

    /// Open a capture stream
    ///
    /// This is where access permission is checked; a refusal must surface
    /// as [`BackendError::PermissionDenied`].
    fn open_stream<'a>(
        &'a self,
        device: &'a CameraDevice,
        request: &'a StreamRequest,
    ) -> BoxFuture<'a, BackendResult<Box<dyn CameraStream>>>;
}

/// Get a platform instance for the given type
pub fn get_platform_for_type(
    platform_type: CameraPlatformType,
    origin: HostOrigin,
) -> Arc<dyn CameraPlatform> {
    match platform_type {
        CameraPlatformType::V4l2 => Arc::new(v4l2::V4l2Platform::new(origin)),
        CameraPlatformType::Virtual => Arc::new(virtual_camera::VirtualPlatform::new(origin)),
    }
}
