//! Spawn ledger — issue id → last spawn record.
//!
//! Created on the first spawn attempt, read on every attempt, and never
//! expired: records only go away through [`SpawnLedger::reset`].

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::issue::IssueId;

const LEDGER_SCHEMA_VERSION: u32 = 1;

/// One persisted spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRecord {
    pub timestamp: DateTime<Utc>,
    /// Readiness generation the spawn belongs to (starts at 1).
    pub generation: u64,
    pub spawn_id: Uuid,
}

impl SpawnRecord {
    pub fn new(generation: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            generation,
            spawn_id: Uuid::new_v4(),
        }
    }
}

/// Result of [`SpawnLedger::check_and_set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckAndSet {
    /// The new record was written.
    Stored,
    /// A record for the same or a later generation already exists.
    Existing(SpawnRecord),
}

/// Durable key-value store behind the spawn coordinator.
pub trait SpawnLedger: Send + Sync {
    fn get(&self, issue: IssueId) -> LedgerResult<Option<SpawnRecord>>;

    /// Store `record` unless the stored generation is already
    /// `>= record.generation`. The check and the write are one atomic step.
    fn check_and_set(&self, issue: IssueId, record: SpawnRecord) -> LedgerResult<CheckAndSet>;

    /// Manual reset. Returns the removed record.
    fn reset(&self, issue: IssueId) -> LedgerResult<Option<SpawnRecord>>;

    /// All records, ordered by issue id.
    fn list(&self) -> LedgerResult<Vec<(IssueId, SpawnRecord)>>;
}

/// Shared reference to a ledger
pub type SharedLedger = Arc<dyn SpawnLedger>;

fn decide(
    records: &mut BTreeMap<IssueId, SpawnRecord>,
    issue: IssueId,
    record: SpawnRecord,
) -> CheckAndSet {
    match records.get(&issue) {
        Some(existing) if existing.generation >= record.generation => {
            CheckAndSet::Existing(existing.clone())
        }
        _ => {
            records.insert(issue, record);
            CheckAndSet::Stored
        }
    }
}

// ============================================================================
// In-memory ledger
// ============================================================================

/// Process-local ledger for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<BTreeMap<IssueId, SpawnRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedLedger {
        Arc::new(self)
    }
}

impl SpawnLedger for MemoryLedger {
    fn get(&self, issue: IssueId) -> LedgerResult<Option<SpawnRecord>> {
        let records = self.records.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(records.get(&issue).cloned())
    }

    fn check_and_set(&self, issue: IssueId, record: SpawnRecord) -> LedgerResult<CheckAndSet> {
        let mut records = self.records.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(decide(&mut records, issue, record))
    }

    fn reset(&self, issue: IssueId) -> LedgerResult<Option<SpawnRecord>> {
        let mut records = self.records.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(records.remove(&issue))
    }

    fn list(&self) -> LedgerResult<Vec<(IssueId, SpawnRecord)>> {
        let records = self.records.lock().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(records.iter().map(|(k, v)| (*k, v.clone())).collect())
    }
}

// ============================================================================
// JSON file ledger
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    schema_version: u32,
    #[serde(default)]
    records: BTreeMap<IssueId, SpawnRecord>,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            schema_version: LEDGER_SCHEMA_VERSION,
            records: BTreeMap::new(),
        }
    }
}

/// Ledger persisted as a JSON file.
///
/// Every operation holds an exclusive advisory lock on `<path>.lock` for the
/// whole read-modify-write, so separate processes handling events for the
/// same issue serialize on it. Writes go through a temp file and rename.
pub struct JsonFileLedger {
    path: PathBuf,
    lock_path: PathBuf,
    local: Mutex<()>,
}

impl JsonFileLedger {
    /// Open a ledger at `path`. The file is created on the first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_name),
            path,
            local: Mutex::new(()),
        }
    }

    pub fn shared(self) -> SharedLedger {
        Arc::new(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Run `f` on the ledger contents under both locks; persist if it
    /// returns `true` in the first tuple slot.
    fn with_locked<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<IssueId, SpawnRecord>) -> (bool, T),
    ) -> LedgerResult<T> {
        let _local = self.local.lock().map_err(|_| LedgerError::LockPoisoned)?;
        let lock_file = self.acquire_file_lock()?;

        let mut contents = self.read()?;
        let (dirty, out) = f(&mut contents.records);
        if dirty {
            self.write(&contents)?;
        }

        // Dropping the handle releases the lock as well.
        let _ = FileExt::unlock(&lock_file);
        Ok(out)
    }

    fn acquire_file_lock(&self) -> LedgerResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| self.io_error(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| self.io_error(&self.lock_path, e))?;
        Ok(file)
    }

    fn read(&self) -> LedgerResult<LedgerFile> {
        if !self.path.exists() {
            return Ok(LedgerFile::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| self.io_error(&self.path, e))?;
        let contents: LedgerFile =
            serde_json::from_str(&raw).map_err(|e| LedgerError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        if contents.schema_version != LEDGER_SCHEMA_VERSION {
            return Err(LedgerError::UnsupportedSchema {
                found: contents.schema_version,
                expected: LEDGER_SCHEMA_VERSION,
            });
        }
        Ok(contents)
    }

    fn write(&self, contents: &LedgerFile) -> LedgerResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| self.io_error(&parent, e))?;

        let mut payload = serde_json::to_string_pretty(contents).map_err(|e| {
            LedgerError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            }
        })?;
        payload.push('\n');

        let mut tmp =
            tempfile::NamedTempFile::new_in(&parent).map_err(|e| self.io_error(&parent, e))?;
        tmp.write_all(payload.as_bytes())
            .map_err(|e| self.io_error(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| self.io_error(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_error(&self.path, e.error))?;
        Ok(())
    }
}

impl SpawnLedger for JsonFileLedger {
    fn get(&self, issue: IssueId) -> LedgerResult<Option<SpawnRecord>> {
        self.with_locked(|records| (false, records.get(&issue).cloned()))
    }

    fn check_and_set(&self, issue: IssueId, record: SpawnRecord) -> LedgerResult<CheckAndSet> {
        self.with_locked(|records| {
            let outcome = decide(records, issue, record);
            (outcome == CheckAndSet::Stored, outcome)
        })
    }

    fn reset(&self, issue: IssueId) -> LedgerResult<Option<SpawnRecord>> {
        self.with_locked(|records| {
            let removed = records.remove(&issue);
            (removed.is_some(), removed)
        })
    }

    fn list(&self) -> LedgerResult<Vec<(IssueId, SpawnRecord)>> {
        self.with_locked(|records| {
            (
                false,
                records.iter().map(|(k, v)| (*k, v.clone())).collect(),
            )
        })
    }
}
