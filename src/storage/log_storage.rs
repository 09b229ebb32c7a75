use crate::util::errors::{ChatError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Backing store for a peer's log snapshot. Always stores the whole log.
pub trait LogStorage: Send + Sync {
    fn load(&self) -> Result<Vec<String>>;
    fn store(&mut self, payloads: &[String]) -> Result<()>;
}

/// One entry per line, in append order, rewritten from scratch on every store.
pub struct FileLogStorage {
    path: PathBuf,
}

impl FileLogStorage {
    /// Snapshot file for the peer listening on `port`: `<data_dir>/<port>.txt`
    pub fn new(data_dir: &Path, port: u16) -> Result<Self> {
        // Create data directory if it doesn't exist
        fs::create_dir_all(data_dir)?;

        Ok(Self {
            path: data_dir.join(format!("{}.txt", port)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStorage for FileLogStorage {
    fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let mut payloads = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.is_empty() {
                payloads.push(line);
            }
        }

        tracing::info!(
            "Loaded {} log entries from {}",
            payloads.len(),
            self.path.display()
        );

        Ok(payloads)
    }

    fn store(&mut self, payloads: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| {
                ChatError::StorageError(format!("cannot open {}: {}", self.path.display(), e))
            })?;

        for payload in payloads {
            writeln!(file, "{}", payload)?;
        }
        file.sync_all()?;

        Ok(())
    }
}

/// Keeps the last stored snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryLogStorage {
    stored: Vec<String>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that already holds `payloads`, as if written by an earlier run.
    pub fn with_entries(payloads: Vec<String>) -> Self {
        Self { stored: payloads }
    }
}

impl LogStorage for MemoryLogStorage {
    fn load(&self) -> Result<Vec<String>> {
        Ok(self.stored.clone())
    }

    fn store(&mut self, payloads: &[String]) -> Result<()> {
        self.stored = payloads.to_vec();
        Ok(())
    }
}
