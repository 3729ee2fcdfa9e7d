// SPDX-License-Identifier: GPL-3.0-only

//! QR code detection task
//!
//! Detection and decoding are done by the rqrr crate. Frames are reduced to
//! their luma plane, cropped to the detection box and downscaled before the
//! search, and detection bounds are mapped back to full-frame coordinates.

use crate::app::frame_processor::FrameDecoder;
use crate::app::frame_processor::types::{DetectionBox, FrameRegion, LumaImage, QrDetection};
use crate::backends::camera::types::CameraFrame;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// QR code detector
pub struct QrDetector {
    /// Maximum dimension for processing (frames are downscaled to this)
    max_dimension: u32,
}

impl Default for QrDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl QrDetector {
    /// Create a new QR detector with default settings
    pub fn new() -> Self {
        Self {
            max_dimension: crate::constants::MAX_DECODE_DIMENSION,
        }
    }

    /// Create a QR detector with custom max dimension
    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Detect QR codes without blocking the async runtime
    pub async fn detect(
        self: Arc<Self>,
        frame: CameraFrame,
        region: Option<DetectionBox>,
    ) -> Vec<QrDetection> {
        tokio::task::spawn_blocking(move || self.decode(&frame, region.as_ref()))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "QR detection task panicked");
                Vec::new()
            })
    }
}

impl FrameDecoder for QrDetector {
    fn decode(&self, frame: &CameraFrame, region: Option<&DetectionBox>) -> Vec<QrDetection> {
        detect_sync(frame, region, self.max_dimension)
    }
}

/// Synchronous QR detection (runs in blocking task)
fn detect_sync(
    frame: &CameraFrame,
    region: Option<&DetectionBox>,
    max_dimension: u32,
) -> Vec<QrDetection> {
    let start = std::time::Instant::now();
    if frame.width == 0 || frame.height == 0 {
        return Vec::new();
    }

    let full = LumaImage::new(frame.width, frame.height, frame.luma());
    let (offset_x, offset_y, luma) = match region {
        Some(b) => {
            let (x, y, w, h) = b.rect_in(frame.width, frame.height);
            (x, y, full.crop(x, y, w, h))
        }
        None => (0, 0, full),
    };
    let (image, scale) = luma.downscale(max_dimension);

    trace!(
        proc_width = image.width,
        proc_height = image.height,
        scale,
        conversion_ms = start.elapsed().as_millis(),
        "Prepared luma image for processing"
    );

    let width = image.width as usize;
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width, image.height as usize, |x, y| {
            image.data[y * width + x]
        });
    let grids = prepared.detect_grids();

    trace!(
        count = grids.len(),
        detection_ms = start.elapsed().as_millis(),
        "QR grid search complete"
    );

    let mut detections = Vec::with_capacity(grids.len());
    for grid in grids {
        let content = match grid.decode() {
            Ok((_meta, content)) => content,
            Err(e) => {
                debug!(error = ?e, "Failed to decode QR grid");
                continue;
            }
        };

        let xs = grid.bounds.iter().map(|p| p.x.max(0) as f32);
        let ys = grid.bounds.iter().map(|p| p.y.max(0) as f32);
        let min_x = xs.clone().fold(f32::MAX, f32::min);
        let max_x = xs.fold(0.0, f32::max);
        let min_y = ys.clone().fold(f32::MAX, f32::min);
        let max_y = ys.fold(0.0, f32::max);

        let bounds = FrameRegion::from_pixels(
            offset_x + (min_x * scale) as u32,
            offset_y + (min_y * scale) as u32,
            ((max_x - min_x) * scale) as u32,
            ((max_y - min_y) * scale) as u32,
            frame.width,
            frame.height,
        );

        debug!(content = %content, x = bounds.x, y = bounds.y, "Detected QR code");
        detections.push(QrDetection::new(bounds, content));
    }

    if !detections.is_empty() {
        debug!(
            count = detections.len(),
            total_ms = start.elapsed().as_millis(),
            "QR detection found codes"
        );
    }

    detections
}
