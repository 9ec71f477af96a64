//! Webhook Log
//!
//! Append-only audit trail of every inbound webhook delivery. Entries are
//! never updated or deleted, and business logic never reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{PaymentError, Result};

/// Outcome of signature verification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Valid,
    Invalid,
}

impl Verification {
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Final outcome of processing one delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingResult {
    /// Handler ran and local state is up to date
    Processed,
    /// Event type is not handled
    Ignored,
    /// Referenced local record does not exist
    NotFound,
    /// Handler failed; see `error_message`
    Failed,
    /// Signature or payload rejected before dispatch
    Rejected,
}

/// An immutable log record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookLogEntry {
    pub id: Uuid,
    pub event_type: String,
    pub raw_payload: String,
    /// Body was not valid UTF-8; `raw_payload` holds a lossy copy
    #[serde(default)]
    pub payload_lossy: bool,
    pub received_at: DateTime<Utc>,
    pub verification: Verification,
    pub processing: ProcessingResult,
    pub error_message: Option<String>,
}

impl WebhookLogEntry {
    pub fn new(
        event_type: impl Into<String>,
        raw_payload: &[u8],
        verification: Verification,
        processing: ProcessingResult,
        error_message: Option<String>,
    ) -> Self {
        let (raw_payload, payload_lossy) = match std::str::from_utf8(raw_payload) {
            Ok(text) => (text.to_string(), false),
            Err(_) => (String::from_utf8_lossy(raw_payload).into_owned(), true),
        };

        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            raw_payload,
            payload_lossy,
            received_at: Utc::now(),
            verification,
            processing,
            error_message,
        }
    }
}

/// Append-only webhook log
pub trait WebhookLog: Send + Sync {
    fn append(&self, entry: WebhookLogEntry) -> Result<()>;

    /// Most recent entries, newest first, for troubleshooting
    fn recent(&self, limit: usize) -> Result<Vec<WebhookLogEntry>>;
}

/// In-memory log (for development and tests)
#[derive(Default)]
pub struct MemoryWebhookLog {
    entries: RwLock<Vec<WebhookLogEntry>>,
}

impl MemoryWebhookLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WebhookLog for MemoryWebhookLog {
    fn append(&self, entry: WebhookLogEntry) -> Result<()> {
        self.entries
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))?
            .push(entry);
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<WebhookLogEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

/// JSON-lines file log; one entry per line
pub struct JsonlWebhookLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlWebhookLog {
    /// Open (or create) the log file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WebhookLog for JsonlWebhookLog {
    fn append(&self, entry: WebhookLogEntry) -> Result<()> {
        let mut line =
            serde_json::to_string(&entry).map_err(|e| PaymentError::Storage(e.to_string()))?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<WebhookLogEntry>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WebhookLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable webhook log line"),
            }
        }
        Ok(entries.into_iter().rev().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(event_type: &str, processing: ProcessingResult) -> WebhookLogEntry {
        WebhookLogEntry::new(
            event_type,
            br#"{"meta":{}}"#,
            Verification::Valid,
            processing,
            None,
        )
    }

    #[test]
    fn test_memory_log_returns_newest_first() {
        let log = MemoryWebhookLog::new();
        log.append(entry("order_created", ProcessingResult::Processed))
            .unwrap();
        log.append(entry("subscription_updated", ProcessingResult::Processed))
            .unwrap();

        let recent = log.recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event_type, "subscription_updated");
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_jsonl_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webhooks.jsonl");

        {
            let log = JsonlWebhookLog::open(&path).unwrap();
            log.append(entry("order_created", ProcessingResult::NotFound))
                .unwrap();
        }

        let log = JsonlWebhookLog::open(&path).unwrap();
        log.append(entry("license_key_created", ProcessingResult::Ignored))
            .unwrap();

        let recent = log.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].processing, ProcessingResult::Ignored);
        assert_eq!(recent[1].event_type, "order_created");
        assert_eq!(recent[1].raw_payload, r#"{"meta":{}}"#);
    }

    #[test]
    fn test_non_utf8_body_is_flagged() {
        let clean = entry("order_created", ProcessingResult::Processed);
        assert!(!clean.payload_lossy);

        let garbled = WebhookLogEntry::new(
            "unknown",
            b"{\"a\":\xff}",
            Verification::Invalid,
            ProcessingResult::Rejected,
            Some("invalid signature".into()),
        );
        assert!(garbled.payload_lossy);
        assert!(garbled.raw_payload.contains('\u{fffd}'));
    }

    #[test]
    fn test_processing_result_wire_names() {
        let json = serde_json::to_string(&ProcessingResult::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
