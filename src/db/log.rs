use crate::storage::LogStorage;
use crate::types::{LogEntry, LogIndex};
use crate::util::errors::{ChatError, Result};

/// A peer's copy of the shared DB: an append/overwrite-only sequence of entries.
///
/// Callers share it behind a single mutex, so `append` and `overwrite`
/// never run concurrently. Every successful mutation rewrites the whole
/// snapshot through the backing `LogStorage`.
pub struct LocalLog {
    entries: Vec<LogEntry>,
    storage: Box<dyn LogStorage>,
}

impl LocalLog {
    /// Empty log. The backing store is overwritten on the first mutation.
    pub fn new(storage: Box<dyn LogStorage>) -> Self {
        Self {
            entries: Vec::new(),
            storage,
        }
    }

    /// Log initialized from whatever the backing store holds.
    pub fn open(storage: Box<dyn LogStorage>) -> Result<Self> {
        let mut log = Self::new(storage);
        log.reload()?;
        Ok(log)
    }

    /// Append `payload` and return the index it landed at.
    pub fn append(&mut self, payload: impl Into<String>) -> Result<LogIndex> {
        let index = self.entries.len();
        self.entries.push(LogEntry::new(index, payload));

        if let Err(e) = self.persist() {
            self.entries.pop();
            return Err(e);
        }

        tracing::debug!("Appended log entry {}", index);
        Ok(index)
    }

    /// Replace the payload at an existing index.
    pub fn overwrite(&mut self, index: LogIndex, payload: impl Into<String>) -> Result<()> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(ChatError::IndexOutOfRange { index, len })?;

        let previous = std::mem::replace(&mut entry.payload, payload.into());

        if let Err(e) = self.persist() {
            self.entries[index].payload = previous;
            return Err(e);
        }

        tracing::debug!("Overwrote log entry {}", index);
        Ok(())
    }

    pub fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    /// The "current key": number of entries ever appended.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.payload.clone()).collect()
    }

    pub fn persist(&mut self) -> Result<()> {
        let payloads = self.snapshot();
        self.storage.store(&payloads)
    }

    /// Replace the in-memory entries with the stored snapshot.
    pub fn reload(&mut self) -> Result<()> {
        self.entries = self
            .storage
            .load()?
            .into_iter()
            .enumerate()
            .map(|(index, payload)| LogEntry::new(index, payload))
            .collect();
        Ok(())
    }
}

impl std::fmt::Debug for LocalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLog")
            .field("entries", &self.entries)
            .finish()
    }
}
