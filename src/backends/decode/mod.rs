// SPDX-License-Identifier: GPL-3.0-only

//! Decode backends
//!
//! A decode backend turns a source (camera frames, or operator input) into
//! decoded code text. All variants share one lifecycle:
//!
//! - `start(source, sink)` begins emitting [`BackendEvent`]s into `sink`
//! - `stop()` ends emission; safe before `start` and any number of times
//! - `rearm()` resumes sampling after a success (single-shot only)
//!
//! The variant is picked once, at construction, by [`DecodeBackendKind`].

pub mod continuous;
pub mod manual;
mod sampler;
pub mod single_shot;

pub use continuous::ContinuousBackend;
pub use manual::{ManualInputBackend, ManualInputSender};
pub use single_shot::SingleShotBackend;

use crate::app::frame_processor::{DetectionBox, FrameDecoder};
use crate::backends::camera::FrameReceiver;
use crate::errors::ScanError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Something a running backend reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A code was decoded
    Decoded(String),
    /// The backend cannot continue
    Error(ScanError),
    /// The frame source closed (camera gone or stream stopped underneath)
    StreamEnded,
}

/// Where backends deliver their events
pub type EventSink = UnboundedSender<BackendEvent>;

/// Decode backend variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeBackendKind {
    /// Decode every sampled frame, emitting each success
    #[default]
    Continuous,
    /// Stop sampling after the first success until re-armed
    SingleShot,
    /// Operator types codes; no camera involved
    ManualInput,
}

impl DecodeBackendKind {
    pub const ALL: [DecodeBackendKind; 3] = [
        DecodeBackendKind::Continuous,
        DecodeBackendKind::SingleShot,
        DecodeBackendKind::ManualInput,
    ];

    /// Whether this variant needs the camera
    pub fn requires_camera(&self) -> bool {
        !matches!(self, DecodeBackendKind::ManualInput)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeBackendKind::Continuous => "continuous",
            DecodeBackendKind::SingleShot => "single-shot",
            DecodeBackendKind::ManualInput => "manual-input",
        }
    }
}

impl std::fmt::Display for DecodeBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecodeBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown decode backend '{}' (expected continuous, single-shot or manual-input)",
                    s
                )
            })
    }
}

/// Runtime options shared by the backends
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Upper bound on decode attempts per second
    pub fps: u32,
    /// Region searched for codes; `None` searches the whole frame
    pub detection_box: Option<DetectionBox>,
    /// Input channel for the manual-input backend
    pub manual_input: ManualInputSender,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            fps: crate::constants::DEFAULT_DECODE_FPS,
            detection_box: Some(DetectionBox::default()),
            manual_input: ManualInputSender::new(),
        }
    }
}

/// Decode backend capability
pub trait DecodeBackend: Send {
    /// Variant of this backend
    fn kind(&self) -> DecodeBackendKind;

    /// Whether `start` needs a frame source
    fn requires_camera(&self) -> bool {
        self.kind().requires_camera()
    }

    /// Begin emitting events into `sink`
    ///
    /// Fails with [`ScanError::BackendInit`] when already started or when a
    /// camera-driven backend gets no frame source.
    fn start(&mut self, source: Option<FrameReceiver>, sink: EventSink) -> Result<(), ScanError>;

    /// Stop emitting. Idempotent.
    fn stop(&mut self);

    /// Resume sampling after a success
    fn rearm(&mut self) {}

    /// Whether the backend is between `start` and `stop`
    fn is_running(&self) -> bool;
}

/// Build the backend for `kind`
pub fn create_backend(
    kind: DecodeBackendKind,
    options: &DecodeOptions,
    decoder: Arc<dyn FrameDecoder>,
) -> Box<dyn DecodeBackend> {
    match kind {
        DecodeBackendKind::Continuous => Box::new(ContinuousBackend::new(options, decoder)),
        DecodeBackendKind::SingleShot => Box::new(SingleShotBackend::new(options, decoder)),
        DecodeBackendKind::ManualInput => {
            Box::new(ManualInputBackend::new(options.manual_input.clone()))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::app::frame_processor::{FrameRegion, QrDetection};
    use crate::backends::camera::CameraFrame;

    /// Decoder that treats a gray frame's bytes as UTF-8 text
    ///
    /// An all-zero frame decodes to nothing.
    pub struct TextDecoder;

    impl FrameDecoder for TextDecoder {
        fn decode(&self, frame: &CameraFrame, _region: Option<&DetectionBox>) -> Vec<QrDetection> {
            let luma = frame.luma();
            if luma.iter().all(|&b| b == 0) {
                return Vec::new();
            }
            let text = String::from_utf8_lossy(&luma).trim_end_matches('\0').to_string();
            vec![QrDetection::new(
                FrameRegion::from_pixels(0, 0, frame.width, frame.height, frame.width, frame.height),
                text,
            )]
        }
    }

    pub fn text_frame(text: &str) -> CameraFrame {
        CameraFrame::gray(text.len() as u32, 1, text.as_bytes().to_vec())
    }

    pub fn blank_frame() -> CameraFrame {
        CameraFrame::gray(4, 1, vec![0; 4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_and_display() {
        for kind in DecodeBackendKind::ALL {
            assert_eq!(kind.to_string().parse::<DecodeBackendKind>(), Ok(kind));
        }
        assert!("laser".parse::<DecodeBackendKind>().is_err());
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&DecodeBackendKind::SingleShot).unwrap();
        assert_eq!(json, "\"single-shot\"");
        let kind: DecodeBackendKind = serde_json::from_str("\"manual-input\"").unwrap();
        assert_eq!(kind, DecodeBackendKind::ManualInput);
    }

    #[test]
    fn test_create_backend_matches_kind() {
        let options = DecodeOptions::default();
        for kind in DecodeBackendKind::ALL {
            let backend = create_backend(kind, &options, Arc::new(test_support::TextDecoder));
            assert_eq!(backend.kind(), kind);
            assert_eq!(backend.requires_camera(), kind != DecodeBackendKind::ManualInput);
            assert!(!backend.is_running());
        }
    }
}
