// SPDX-License-Identifier: GPL-3.0-only

//! Frame sampling loop shared by the camera-driven backends

use super::{BackendEvent, DecodeOptions, EventSink};
use crate::app::frame_processor::{DetectionBox, FrameDecoder};
use crate::backends::camera::FrameReceiver;
use crate::errors::ScanError;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SampleMode {
    /// Emit every decoded code, keep sampling
    Continuous,
    /// Emit the first decoded code, then disarm
    SingleShot,
}

/// A running sampling task
pub(super) struct Sampler {
    running: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Sampler {
    pub(super) fn spawn(
        mode: SampleMode,
        frames: FrameReceiver,
        sink: EventSink,
        decoder: Arc<dyn FrameDecoder>,
        options: &DecodeOptions,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let armed = Arc::new(AtomicBool::new(true));
        let min_interval = if options.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / options.fps
        };

        let task = tokio::spawn(sample_loop(
            mode,
            frames,
            sink,
            decoder,
            options.detection_box,
            min_interval,
            Arc::clone(&running),
            Arc::clone(&armed),
        ));

        Self {
            running,
            armed,
            task,
        }
    }

    pub(super) fn rearm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub(super) fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn sample_loop(
    mode: SampleMode,
    mut frames: FrameReceiver,
    sink: EventSink,
    decoder: Arc<dyn FrameDecoder>,
    region: Option<DetectionBox>,
    min_interval: Duration,
    running: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
) {
    debug!(?mode, interval_ms = min_interval.as_millis() as u64, "Frame sampling started");
    let mut last_sample: Option<Instant> = None;

    while let Some(frame) = frames.next().await {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        // Disarmed single-shot: keep draining so the capture side never stalls
        if !armed.load(Ordering::SeqCst) {
            continue;
        }
        if last_sample.is_some_and(|t| t.elapsed() < min_interval) {
            continue;
        }
        last_sample = Some(Instant::now());

        let task_decoder = Arc::clone(&decoder);
        let detections =
            match tokio::task::spawn_blocking(move || task_decoder.decode(&frame, region.as_ref()))
                .await
            {
                Ok(detections) => detections,
                Err(e) => {
                    warn!(error = %e, "Decoder task failed");
                    if running.load(Ordering::SeqCst) {
                        let _ = sink.send(BackendEvent::Error(ScanError::BackendInit(format!(
                            "decoder crashed: {}",
                            e
                        ))));
                    }
                    return;
                }
            };

        if detections.is_empty() {
            let miss = ScanError::DecodeTransient("no code in frame".to_string());
            trace!(error = %miss, "Frame sampled");
            continue;
        }
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let emit: Vec<String> = match mode {
            SampleMode::Continuous => detections.into_iter().map(|d| d.content).collect(),
            SampleMode::SingleShot => {
                armed.store(false, Ordering::SeqCst);
                detections.into_iter().take(1).map(|d| d.content).collect()
            }
        };
        for text in emit {
            debug!(text = %text, "Code decoded");
            if sink.send(BackendEvent::Decoded(text)).is_err() {
                debug!("Event sink closed, ending sampling");
                return;
            }
        }
    }

    if running.load(Ordering::SeqCst) {
        debug!("Frame source closed");
        let _ = sink.send(BackendEvent::StreamEnded);
    }
}
