//! Append-only audit sinks for dispatch records

use crate::io::{append_jsonl, read_jsonl_tail};
use crate::types::DispatchRecord;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit backend failed: {0}")]
    Backend(String),
}

/// Durable, append-only destination for [`DispatchRecord`]s
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &DispatchRecord) -> Result<(), AuditError>;

    /// Most recent records, oldest first, at most `limit`
    fn recent(&self, limit: usize) -> Result<Vec<DispatchRecord>, AuditError>;
}

/// Audit log stored as one JSON object per line
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, record: &DispatchRecord) -> Result<(), AuditError> {
        // Lines from concurrent recorders must not interleave.
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        append_jsonl(&self.path, record)?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<DispatchRecord>, AuditError> {
        Ok(read_jsonl_tail(&self.path, limit)?)
    }
}
