// SPDX-License-Identifier: GPL-3.0-only

//! Manual input: an operator types (or a wedge scanner "types") codes.
//!
//! The [`ManualInputSender`] is created up front and handed to whoever reads
//! the operator's input. Lines submitted while the backend is stopped are
//! discarded.

use super::{BackendEvent, DecodeBackend, DecodeBackendKind, EventSink};
use crate::backends::camera::FrameReceiver;
use crate::errors::ScanError;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Input side of the manual-input backend
#[derive(Clone, Default)]
pub struct ManualInputSender {
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl std::fmt::Debug for ManualInputSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualInputSender")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ManualInputSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<EventSink>> {
        self.sink.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a started backend is listening
    pub fn is_connected(&self) -> bool {
        self.slot().is_some()
    }

    /// Submit one line of input
    ///
    /// Surrounding whitespace is trimmed; blank lines are ignored. Returns
    /// whether the code was delivered.
    pub fn submit(&self, line: &str) -> bool {
        let code = line.trim();
        if code.is_empty() {
            return false;
        }
        match self.slot().as_ref() {
            Some(sink) => sink.send(BackendEvent::Decoded(code.to_string())).is_ok(),
            None => {
                debug!(code, "Manual input discarded, scanner not running");
                false
            }
        }
    }

    /// Signal that the input source is exhausted (EOF)
    pub fn close(&self) {
        if let Some(sink) = self.slot().take() {
            let _ = sink.send(BackendEvent::StreamEnded);
        }
    }
}

/// Decode backend fed by an operator
pub struct ManualInputBackend {
    input: ManualInputSender,
    running: bool,
}

impl ManualInputBackend {
    pub fn new(input: ManualInputSender) -> Self {
        Self {
            input,
            running: false,
        }
    }

    /// The sender feeding this backend
    pub fn sender(&self) -> ManualInputSender {
        self.input.clone()
    }
}

impl DecodeBackend for ManualInputBackend {
    fn kind(&self) -> DecodeBackendKind {
        DecodeBackendKind::ManualInput
    }

    fn start(&mut self, _source: Option<FrameReceiver>, sink: EventSink) -> Result<(), ScanError> {
        if self.running {
            return Err(ScanError::BackendInit("manual input already started".into()));
        }
        let mut slot = self.input.slot();
        if slot.is_some() {
            return Err(ScanError::BackendInit(
                "manual input is attached to another scanner".into(),
            ));
        }
        *slot = Some(sink);
        drop(slot);
        self.running = true;
        info!("Manual input ready");
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.input.slot().take();
            self.running = false;
            info!("Manual input stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for ManualInputBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
