// SPDX-License-Identifier: GPL-3.0-only

//! Attendance submission seam
//!
//! The scanner never talks to the attendance server itself. Accepted scans
//! are handed to an [`AttendanceSubmitter`]; the crate ships
//! [`JsonLinesSubmitter`], which journals sessions and scans as one JSON
//! object per line (the CLI writes them to stdout).

use crate::errors::SubmissionError;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A decoded code ready for submission. Never persisted by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub raw_text: String,
    pub timestamp: DateTime<Utc>,
    /// Attendance session the scan belongs to
    pub session_id: String,
}

impl ScanEvent {
    pub fn new(raw_text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Late,
    Absent,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        })
    }
}

/// What the server recorded for a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Student identifier (the scanned code)
    pub student: String,
    pub subject_id: String,
    pub recorded_at: DateTime<Utc>,
    pub status: AttendanceStatus,
}

/// An open attendance session for one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub id: String,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
}

/// Records attendance for decoded codes
pub trait AttendanceSubmitter: Send + Sync {
    /// Record `code` against the open session `session_id`
    fn submit_scan<'a>(
        &'a self,
        code: &'a str,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<AttendanceRecord, SubmissionError>>;

    /// Open an attendance session for a subject
    fn start_session<'a>(
        &'a self,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<AttendanceSession, SubmissionError>>;

    /// Close an attendance session
    fn end_session<'a>(&'a self, session_id: &'a str)
    -> BoxFuture<'a, Result<(), SubmissionError>>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JournalEntry<'a> {
    SessionStarted {
        session: &'a AttendanceSession,
    },
    Scan {
        session_id: &'a str,
        #[serde(flatten)]
        record: &'a AttendanceRecord,
    },
    SessionEnded {
        session_id: &'a str,
        ended_at: DateTime<Utc>,
    },
}

/// Journals sessions and scans as JSON lines
pub struct JsonLinesSubmitter<W: Write + Send> {
    writer: Mutex<W>,
    sessions: Mutex<HashMap<String, AttendanceSession>>,
}

impl<W: Write + Send> JsonLinesSubmitter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Consume the submitter, returning the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, entry: &JournalEntry<'_>) -> Result<(), SubmissionError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::to_writer(&mut *writer, entry)
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;
        writeln!(writer).map_err(|e| SubmissionError::Transport(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| SubmissionError::Transport(e.to_string()))
    }

    fn session(&self, session_id: &str) -> Option<AttendanceSession> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    fn record_scan(&self, code: &str, session_id: &str) -> Result<AttendanceRecord, SubmissionError> {
        let session = self.session(session_id).ok_or_else(|| {
            warn!(session_id, "Scan submitted without an open session");
            SubmissionError::NoActiveSession
        })?;
        let record = AttendanceRecord {
            student: code.to_string(),
            subject_id: session.subject_id,
            recorded_at: Utc::now(),
            status: AttendanceStatus::Present,
        };
        self.write(&JournalEntry::Scan {
            session_id,
            record: &record,
        })?;
        debug!(student = %record.student, session_id, "Attendance recorded");
        Ok(record)
    }

    fn open_session(&self, subject_id: &str) -> Result<AttendanceSession, SubmissionError> {
        if subject_id.trim().is_empty() {
            return Err(SubmissionError::Rejected("subject id is required".into()));
        }
        let session = AttendanceSession {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            started_at: Utc::now(),
        };
        self.write(&JournalEntry::SessionStarted { session: &session })?;
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id.clone(), session.clone());
        info!(session_id = %session.id, subject_id, "Attendance session started");
        Ok(session)
    }

    fn close_session(&self, session_id: &str) -> Result<(), SubmissionError> {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if removed.is_none() {
            return Err(SubmissionError::NoActiveSession);
        }
        self.write(&JournalEntry::SessionEnded {
            session_id,
            ended_at: Utc::now(),
        })?;
        info!(session_id, "Attendance session ended");
        Ok(())
    }
}

impl<W: Write + Send> AttendanceSubmitter for JsonLinesSubmitter<W> {
    fn submit_scan<'a>(
        &'a self,
        code: &'a str,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<AttendanceRecord, SubmissionError>> {
        futures::future::ready(self.record_scan(code, session_id)).boxed()
    }

    fn start_session<'a>(
        &'a self,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<AttendanceSession, SubmissionError>> {
        futures::future::ready(self.open_session(subject_id)).boxed()
    }

    fn end_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> BoxFuture<'a, Result<(), SubmissionError>> {
        futures::future::ready(self.close_session(session_id)).boxed()
    }
}
