// SPDX-License-Identifier: GPL-3.0-only

//! Scanning logic above the backends
//!
//! # Architecture
//!
//! - `session`: the per-scanner state machine ([`ScanSessionController`])
//! - `state`: session state types (`ScanState`, `ScanSession`, `StateUpdate`)
//! - `debounce`: duplicate scan suppression
//! - `submitter`: the attendance submission seam
//! - `frame_processor`: pixel-level code detection
//!
//! # Main Types
//!
//! - `ScanSessionController`: drives acquisition, decoding and teardown
//! - `SessionObserver`: callbacks the host implements
//! - `AttendanceSubmitter`: where accepted scans go

pub mod debounce;
pub mod frame_processor;
pub mod session;
pub mod state;
pub mod submitter;

pub use debounce::{DebounceEntry, ScanEventDebouncer};
pub use session::{NullObserver, ScanSessionController, SessionConfig, SessionObserver};
pub use state::{ScanSession, ScanState, StateUpdate};
pub use submitter::{
    AttendanceRecord, AttendanceSession, AttendanceStatus, AttendanceSubmitter, JsonLinesSubmitter,
    ScanEvent,
};
