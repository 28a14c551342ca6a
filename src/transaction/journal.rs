//! BASE transaction log
//!
//! Statements run inside a BASE transaction are logged before execution and
//! removed once they succeed. Whatever remains is redelivered by the
//! [`AsyncDeliveryJob`](super::AsyncDeliveryJob).

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::TransactionId;
use crate::error::{DbError, DbResult};
use crate::value::Value;

/// One statement awaiting (re)delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: String,
    pub transaction_id: TransactionId,
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Value>,
    pub created_at: DateTime<Utc>,
    pub try_times: u32,
}

impl TransactionLog {
    pub fn new(transaction_id: TransactionId, data_source: &str, sql: &str, parameters: Vec<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_id,
            data_source: data_source.to_string(),
            sql: sql.to_string(),
            parameters,
            created_at: Utc::now(),
            try_times: 0,
        }
    }
}

pub trait TransactionLogStorage: Send + Sync {
    fn add(&self, log: TransactionLog) -> DbResult<()>;

    fn remove(&self, id: &str) -> DbResult<()>;

    fn increase_try_times(&self, id: &str) -> DbResult<()>;

    /// Logs tried fewer than `max_try_times` times, oldest first, at most `limit`.
    fn find_eligible(&self, max_try_times: u32, limit: usize) -> DbResult<Vec<TransactionLog>>;

    /// Every log still held, oldest first.
    fn pending(&self) -> DbResult<Vec<TransactionLog>>;

    /// Reclaim space held by finished logs. Called after every delivery pass.
    fn maintain(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Dead journal records tolerated before the file is rewritten.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 1000;

fn eligible(logs: &[TransactionLog], max_try_times: u32, limit: usize) -> Vec<TransactionLog> {
    logs.iter()
        .filter(|log| log.try_times < max_try_times)
        .take(limit)
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
pub struct MemoryTransactionLogStorage {
    logs: RwLock<Vec<TransactionLog>>,
}

impl MemoryTransactionLogStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLogStorage for MemoryTransactionLogStorage {
    fn add(&self, log: TransactionLog) -> DbResult<()> {
        self.logs.write().push(log);
        Ok(())
    }

    fn remove(&self, id: &str) -> DbResult<()> {
        self.logs.write().retain(|log| log.id != id);
        Ok(())
    }

    fn increase_try_times(&self, id: &str) -> DbResult<()> {
        if let Some(log) = self.logs.write().iter_mut().find(|log| log.id == id) {
            log.try_times += 1;
        }
        Ok(())
    }

    fn find_eligible(&self, max_try_times: u32, limit: usize) -> DbResult<Vec<TransactionLog>> {
        Ok(eligible(&self.logs.read(), max_try_times, limit))
    }

    fn pending(&self) -> DbResult<Vec<TransactionLog>> {
        Ok(self.logs.read().clone())
    }
}

/// Journal record types, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalEntry {
    Add(TransactionLog),
    Remove { id: String },
    Retry { id: String },
}

/// Append-only JSON-lines journal with an in-memory view rebuilt on open.
pub struct FileTransactionLogStorage {
    path: PathBuf,
    file: Mutex<File>,
    logs: RwLock<Vec<TransactionLog>>,
    /// lines currently in the file
    records: AtomicUsize,
    compact_threshold: usize,
}

impl FileTransactionLogStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        let logs = replay(&entries);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DbError::Journal(format!("Failed to open journal {}: {}", path.display(), e)))?;

        if !logs.is_empty() {
            tracing::info!("Recovered {} pending BASE log(s) from {}", logs.len(), path.display());
        }
        Ok(Self {
            path,
            file: Mutex::new(file),
            logs: RwLock::new(logs),
            records: AtomicUsize::new(entries.len()),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        })
    }

    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that no longer describe a live log.
    pub fn dead_records(&self) -> usize {
        self.records
            .load(Ordering::Acquire)
            .saturating_sub(self.logs.read().len())
    }

    fn append(&self, entry: &JournalEntry) -> DbResult<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| DbError::Journal(format!("Failed to serialize journal entry: {}", e)))?;

        let mut file = self.file.lock();
        writeln!(file, "{}", json).map_err(|e| DbError::Journal(format!("Failed to write journal entry: {}", e)))?;
        file.sync_all()
            .map_err(|e| DbError::Journal(format!("Failed to sync journal: {}", e)))?;
        self.records.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Rewrite the journal with only the live logs.
    pub fn compact(&self) -> DbResult<()> {
        let mut file = self.file.lock();
        let logs = self.logs.read();

        let temp_path = self.path.with_extension("journal.tmp");
        let mut temp = File::create(&temp_path)
            .map_err(|e| DbError::Journal(format!("Failed to create temp journal: {}", e)))?;
        for log in logs.iter() {
            let json = serde_json::to_string(&JournalEntry::Add(log.clone()))
                .map_err(|e| DbError::Journal(format!("Failed to serialize journal entry: {}", e)))?;
            writeln!(temp, "{}", json)
                .map_err(|e| DbError::Journal(format!("Failed to write temp journal: {}", e)))?;
        }
        temp.sync_all()
            .map_err(|e| DbError::Journal(format!("Failed to sync temp journal: {}", e)))?;

        std::fs::rename(&temp_path, &self.path)
            .map_err(|e| DbError::Journal(format!("Failed to replace journal: {}", e)))?;
        *file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| DbError::Journal(format!("Failed to reopen journal: {}", e)))?;
        self.records.store(logs.len(), Ordering::Release);

        tracing::debug!("Journal compacted to {} log(s)", logs.len());
        Ok(())
    }
}

fn read_entries(path: &Path) -> DbResult<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| DbError::Journal(format!("Failed to open journal: {}", e)))?;

    let mut entries = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| DbError::Journal(format!("Failed to read journal line {}: {}", line_num, e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| {
            DbError::Journal(format!("Failed to parse journal entry at line {}: {}", line_num, e))
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn replay(entries: &[JournalEntry]) -> Vec<TransactionLog> {
    let mut logs: Vec<TransactionLog> = Vec::new();
    for entry in entries {
        match entry {
            JournalEntry::Add(log) => logs.push(log.clone()),
            JournalEntry::Remove { id } => logs.retain(|log| &log.id != id),
            JournalEntry::Retry { id } => {
                if let Some(log) = logs.iter_mut().find(|log| &log.id == id) {
                    log.try_times += 1;
                }
            }
        }
    }
    logs
}

impl TransactionLogStorage for FileTransactionLogStorage {
    fn add(&self, log: TransactionLog) -> DbResult<()> {
        self.append(&JournalEntry::Add(log.clone()))?;
        self.logs.write().push(log);
        Ok(())
    }

    fn remove(&self, id: &str) -> DbResult<()> {
        self.append(&JournalEntry::Remove { id: id.to_string() })?;
        self.logs.write().retain(|log| log.id != id);
        Ok(())
    }

    fn increase_try_times(&self, id: &str) -> DbResult<()> {
        self.append(&JournalEntry::Retry { id: id.to_string() })?;
        if let Some(log) = self.logs.write().iter_mut().find(|log| log.id == id) {
            log.try_times += 1;
        }
        Ok(())
    }

    fn find_eligible(&self, max_try_times: u32, limit: usize) -> DbResult<Vec<TransactionLog>> {
        Ok(eligible(&self.logs.read(), max_try_times, limit))
    }

    fn pending(&self) -> DbResult<Vec<TransactionLog>> {
        Ok(self.logs.read().clone())
    }

    fn maintain(&self) -> DbResult<()> {
        if self.dead_records() >= self.compact_threshold {
            self.compact()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn log(sql: &str) -> TransactionLog {
        TransactionLog::new(TransactionId::new(), "ds0", sql, vec![Value::Integer(1)])
    }

    #[test]
    fn test_memory_storage_eligibility() {
        let storage = MemoryTransactionLogStorage::new();
        let first = log("UPDATE a");
        let second = log("UPDATE b");
        storage.add(first.clone()).unwrap();
        storage.add(second.clone()).unwrap();

        storage.increase_try_times(&first.id).unwrap();
        storage.increase_try_times(&first.id).unwrap();
        let eligible = storage.find_eligible(2, 10).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, second.id);

        storage.remove(&second.id).unwrap();
        assert_eq!(storage.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_file_storage_replays_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.journal");

        let kept = log("UPDATE kept");
        {
            let storage = FileTransactionLogStorage::open(&path).unwrap();
            let removed = log("UPDATE removed");
            storage.add(kept.clone()).unwrap();
            storage.add(removed.clone()).unwrap();
            storage.increase_try_times(&kept.id).unwrap();
            storage.remove(&removed.id).unwrap();
        }

        let reopened = FileTransactionLogStorage::open(&path).unwrap();
        let pending = reopened.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, kept.id);
        assert_eq!(pending[0].try_times, 1);
        assert_eq!(pending[0].parameters, vec![Value::Integer(1)]);
    }

    #[test]
    fn test_compact_keeps_only_live_logs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.journal");

        let storage = FileTransactionLogStorage::open(&path).unwrap();
        for i in 0..3 {
            let entry = log(&format!("UPDATE {}", i));
            storage.add(entry.clone()).unwrap();
            if i < 2 {
                storage.remove(&entry.id).unwrap();
            }
        }
        storage.compact().unwrap();
        // still appendable after the rewrite
        storage.add(log("UPDATE after")).unwrap();

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert_eq!(storage.dead_records(), 0);
        assert_eq!(FileTransactionLogStorage::open(&path).unwrap().pending().unwrap().len(), 2);
    }

    #[test]
    fn test_maintain_compacts_past_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.journal");
        let storage = FileTransactionLogStorage::open(&path).unwrap().with_compact_threshold(4);

        let first = log("UPDATE first");
        storage.add(first.clone()).unwrap();
        storage.add(log("UPDATE live")).unwrap();
        storage.remove(&first.id).unwrap();
        assert_eq!(storage.dead_records(), 2);
        // below the threshold the file is left alone
        storage.maintain().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);

        let second = log("UPDATE second");
        storage.add(second.clone()).unwrap();
        storage.remove(&second.id).unwrap();
        storage.maintain().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_dead_records_counted_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base.journal");
        {
            let storage = FileTransactionLogStorage::open(&path).unwrap();
            let entry = log("UPDATE gone");
            storage.add(entry.clone()).unwrap();
            storage.increase_try_times(&entry.id).unwrap();
            storage.remove(&entry.id).unwrap();
        }
        assert_eq!(FileTransactionLogStorage::open(&path).unwrap().dead_records(), 3);
    }
}
