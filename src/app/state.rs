// SPDX-License-Identifier: GPL-3.0-only

//! Scan session state

use crate::backends::decode::DecodeBackendKind;
use crate::errors::ScanError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scan session state machine
///
/// ```text
/// Idle ──activate──▶ Initializing ──ready──▶ Scanning ◀──pulse── Success
///  ▲                      │                    │  └──accepted──────▲
///  │                      └────failed──▶ Error ◀──fatal──┘
///  └───────────────retry──────────────────┘
/// ```
///
/// `teardown` returns to `Idle` from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    #[default]
    Idle,
    /// Waiting for the camera (and the permission prompt)
    Initializing,
    /// Decoding frames or waiting for input
    Scanning,
    /// A code was just accepted
    Success,
    /// A fatal error stopped scanning; only `retry` or `teardown` leave it
    Error,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Initializing => "initializing",
            ScanState::Scanning => "scanning",
            ScanState::Success => "success",
            ScanState::Error => "error",
        }
    }

    /// Whether the session holds (or is about to hold) its input source
    pub fn is_live(&self) -> bool {
        matches!(self, ScanState::Scanning | ScanState::Success)
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one scanner instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSession {
    pub id: Uuid,
    /// Incremented on every acquisition attempt and on teardown
    pub generation: u64,
    pub state: ScanState,
    pub active_device_id: Option<String>,
    pub backend_kind: DecodeBackendKind,
}

impl ScanSession {
    pub fn new(backend_kind: DecodeBackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation: 0,
            state: ScanState::Idle,
            active_device_id: None,
            backend_kind,
        }
    }
}

/// State change reported to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub state: ScanState,
    /// Set when entering `Error`
    pub error: Option<ScanError>,
    pub generation: u64,
}
