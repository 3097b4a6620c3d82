//! Append-only JSONL audit trail
//!
//! Each line is a JSON-serialized `AuditRecord`. The file is append-only
//! and is never modified. The trail takes `&self` for appends so that
//! concurrent ledger operations can share one handle.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{AuditError, AuditResult};
use crate::record::AuditRecord;

enum Backend {
    File { file: File },
    Memory { records: Vec<AuditRecord> },
}

/// Append-only audit trail.
pub struct AuditTrail {
    path: PathBuf,
    backend: Mutex<Backend>,
}

impl AuditTrail {
    /// Open (or create) a file-backed trail at the given path.
    pub fn new(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            backend: Mutex::new(Backend::File { file }),
        })
    }

    /// Create an in-memory trail (for testing). Records are retained and
    /// readable through `read_all`.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            backend: Mutex::new(Backend::Memory {
                records: Vec::new(),
            }),
        }
    }

    /// Append a record. Flushes immediately so a crash cannot lose an
    /// acknowledged write.
    pub fn append(&self, record: &AuditRecord) -> AuditResult<()> {
        let mut backend = self.backend.lock().map_err(|_| AuditError::Poisoned)?;

        match &mut *backend {
            Backend::File { file } => {
                let json = serde_json::to_string(record)?;
                writeln!(file, "{}", json)?;
                file.flush()?;
            }
            Backend::Memory { records } => {
                // Validate serialization even when not persisting
                let _ = serde_json::to_string(record)?;
                records.push(record.clone());
            }
        }

        tracing::debug!(action = %record.action, resource = %record.resource_id, "audit record appended");
        Ok(())
    }

    /// Read every record in the trail (for reconciliation and tests).
    pub fn read_all(&self) -> AuditResult<Vec<AuditRecord>> {
        let backend = self.backend.lock().map_err(|_| AuditError::Poisoned)?;

        match &*backend {
            Backend::Memory { records } => Ok(records.clone()),
            Backend::File { .. } => {
                let file = File::open(&self.path)?;
                let reader = BufReader::new(file);
                let mut records = Vec::new();

                for line in reader.lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: AuditRecord = serde_json::from_str(&line)?;
                    records.push(record);
                }

                Ok(records)
            }
        }
    }

    /// Number of records in the trail.
    pub fn len(&self) -> AuditResult<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Path of the backing file; empty for in-memory trails.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
