//! Append-only audit trail: a JSON Lines store and history replay.
//!
//! The engine never consults history to make decisions. Replay exists for compliance
//! reporting, where a mismatch between the replayed phase and `current_phase` flags drift.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::error;

use super::domain::{Phase, TransactionId, TransitionRecord};
use super::repository::{AuditError, AuditStore};

/// Append target of the JSONL log. A failed append must be rolled back with `truncate`.
trait LogFile: Write + Send {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Audit store backed by a JSONL file, one record per line, synced per append.
///
/// Writes go straight to the file. An append that fails part way is truncated back to the
/// previous length, so a record is on disk exactly when `append` returned `Ok`.
pub struct JsonlAuditStore {
    file: Mutex<Box<dyn LogFile>>,
    path: PathBuf,
}

impl JsonlAuditStore {
    /// Open (or create) the log. Existing content is never truncated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self::with_file(path, Box::new(file)))
    }

    fn with_file(path: PathBuf, file: Box<dyn LogFile>) -> Self {
        Self {
            file: Mutex::new(file),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<TransitionRecord>, AuditError> {
        let file = File::open(&self.path).map_err(|source| AuditError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, record: &TransitionRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| AuditError::Unavailable("audit log lock poisoned".to_string()))?;
        let start = file.len()?;

        let written = file
            .write_all(&line)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync());
        if let Err(source) = written {
            if let Err(truncate_error) = file.truncate(start) {
                error!(
                    path = %self.path.display(),
                    record_id = %record.id,
                    length = start,
                    error = %truncate_error,
                    "failed to roll back partial audit line; log needs repair"
                );
            }
            return Err(AuditError::Write(source));
        }
        Ok(())
    }

    fn history(&self, id: &TransactionId) -> Result<Vec<TransitionRecord>, AuditError> {
        // Hold the append lock so a half-written line is never observed.
        let _file = self
            .file
            .lock()
            .map_err(|_| AuditError::Unavailable("audit log lock poisoned".to_string()))?;
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|record| &record.transaction_id == id)
            .collect())
    }
}

/// First record whose `from_phase` does not continue the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayGap {
    pub index: usize,
    pub expected_from: Phase,
    pub found_from: Phase,
}

/// Replay history from `ENQUIRY`, returning the phase it reconstructs.
pub fn replay_phase(records: &[TransitionRecord]) -> Result<Phase, ReplayGap> {
    records
        .iter()
        .enumerate()
        .try_fold(Phase::Enquiry, |phase, (index, record)| {
            if record.from_phase == phase {
                Ok(record.to_phase)
            } else {
                Err(ReplayGap {
                    index,
                    expected_from: phase,
                    found_from: record.from_phase,
                })
            }
        })
}

/// Compliance view comparing the stored phase with the replayed history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub transaction_id: TransactionId,
    pub current_phase: Phase,
    pub replayed_phase: Option<Phase>,
    pub entries: usize,
    pub consistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<ReplayGap>,
}

impl AuditReport {
    pub fn build(
        transaction_id: TransactionId,
        current_phase: Phase,
        records: &[TransitionRecord],
    ) -> Self {
        let (replayed_phase, gap) = match replay_phase(records) {
            Ok(phase) => (Some(phase), None),
            Err(gap) => (None, Some(gap)),
        };
        Self {
            transaction_id,
            current_phase,
            replayed_phase,
            entries: records.len(),
            consistent: replayed_phase == Some(current_phase),
            gap,
        }
    }
}
