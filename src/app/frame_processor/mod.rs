// SPDX-License-Identifier: GPL-3.0-only

//! Frame analysis
//!
//! Turns camera frames into decoded code text. The pixel-level decoder is a
//! capability behind [`FrameDecoder`]; [`QrDetector`] is the rqrr based
//! implementation used by default.

pub mod tasks;
pub mod types;

pub use tasks::QrDetector;
pub use types::{DetectionBox, FrameRegion, LumaImage, QrDetection};

use crate::backends::camera::CameraFrame;

/// Pixel-level code decoder
///
/// Implementations are synchronous and CPU bound; callers run them on the
/// blocking pool.
pub trait FrameDecoder: Send + Sync {
    /// Find and decode every code in `frame`, restricted to `region` if given
    fn decode(&self, frame: &CameraFrame, region: Option<&DetectionBox>) -> Vec<QrDetection>;
}
