// SPDX-License-Identifier: GPL-3.0-only

//! Single-shot decoding: sample until the first code is found, emit it, then
//! idle until re-armed. Frames keep being drained while idle.

use super::sampler::{SampleMode, Sampler};
use super::{DecodeBackend, DecodeBackendKind, DecodeOptions, EventSink};
use crate::app::frame_processor::FrameDecoder;
use crate::backends::camera::FrameReceiver;
use crate::errors::ScanError;
use std::sync::Arc;
use tracing::{debug, info};

pub struct SingleShotBackend {
    options: DecodeOptions,
    decoder: Arc<dyn FrameDecoder>,
    sampler: Option<Sampler>,
}

impl SingleShotBackend {
    pub fn new(options: &DecodeOptions, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            options: options.clone(),
            decoder,
            sampler: None,
        }
    }
}

impl DecodeBackend for SingleShotBackend {
    fn kind(&self) -> DecodeBackendKind {
        DecodeBackendKind::SingleShot
    }

    fn start(&mut self, source: Option<FrameReceiver>, sink: EventSink) -> Result<(), ScanError> {
        if self.sampler.is_some() {
            return Err(ScanError::BackendInit("single-shot decoder already started".into()));
        }
        let frames = source.ok_or_else(|| {
            ScanError::BackendInit("no frame source for single-shot decoder".into())
        })?;
        info!("Starting single-shot decoder");
        self.sampler = Some(Sampler::spawn(
            SampleMode::SingleShot,
            frames,
            sink,
            Arc::clone(&self.decoder),
            &self.options,
        ));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            info!("Stopping single-shot decoder");
            sampler.stop();
        }
    }

    fn rearm(&mut self) {
        if let Some(sampler) = &self.sampler {
            debug!("Re-arming single-shot decoder");
            sampler.rearm();
        }
    }

    fn is_running(&self) -> bool {
        self.sampler.is_some()
    }
}

impl Drop for SingleShotBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
