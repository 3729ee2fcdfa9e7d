// SPDX-License-Identifier: GPL-3.0-only

//! Continuous decoding: every sampled frame is decoded and every code found
//! is emitted. Duplicate suppression is left to the debouncer.

use super::sampler::{SampleMode, Sampler};
use super::{DecodeBackend, DecodeBackendKind, DecodeOptions, EventSink};
use crate::app::frame_processor::FrameDecoder;
use crate::backends::camera::FrameReceiver;
use crate::errors::ScanError;
use std::sync::Arc;
use tracing::info;

pub struct ContinuousBackend {
    options: DecodeOptions,
    decoder: Arc<dyn FrameDecoder>,
    sampler: Option<Sampler>,
}

impl ContinuousBackend {
    pub fn new(options: &DecodeOptions, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            options: options.clone(),
            decoder,
            sampler: None,
        }
    }
}

impl DecodeBackend for ContinuousBackend {
    fn kind(&self) -> DecodeBackendKind {
        DecodeBackendKind::Continuous
    }

    fn start(&mut self, source: Option<FrameReceiver>, sink: EventSink) -> Result<(), ScanError> {
        if self.sampler.is_some() {
            return Err(ScanError::BackendInit("continuous decoder already started".into()));
        }
        let frames = source
            .ok_or_else(|| ScanError::BackendInit("no frame source for continuous decoder".into()))?;
        info!(fps = self.options.fps, "Starting continuous decoder");
        self.sampler = Some(Sampler::spawn(
            SampleMode::Continuous,
            frames,
            sink,
            Arc::clone(&self.decoder),
            &self.options,
        ));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            info!("Stopping continuous decoder");
            sampler.stop();
        }
    }

    fn is_running(&self) -> bool {
        self.sampler.is_some()
    }
}

impl Drop for ContinuousBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
