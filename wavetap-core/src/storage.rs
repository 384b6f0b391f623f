use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("payload spill failed: {0}")]
    Spill(std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

// Payloads up to this size stay in memory; larger ones spill to a temp
// file owned by the run and reclaimed on drop.
const SPILL_THRESHOLD: usize = 64 * 1024 * 1024;

/// Buffer for the streamed payload while a run is in flight. Owned by
/// exactly one run; handed to a [`PayloadStore`] only after success, and
/// simply dropped on failure.
#[derive(Debug)]
pub struct PayloadSink {
    memory: Vec<u8>,
    spill: Option<NamedTempFile>,
    threshold: usize,
    total: u64,
}

impl Default for PayloadSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadSink {
    pub fn new() -> Self {
        Self::with_threshold(SPILL_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            memory: Vec::new(),
            spill: None,
            threshold,
            total: 0,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) -> StorageResult<()> {
        self.total += chunk.len() as u64;
        match self.spill.as_mut() {
            Some(file) => file.write_all(chunk).map_err(StorageError::Spill)?,
            None => {
                self.memory.extend_from_slice(chunk);
                if self.memory.len() > self.threshold {
                    let mut file = NamedTempFile::new().map_err(StorageError::Spill)?;
                    file.write_all(&self.memory).map_err(StorageError::Spill)?;
                    debug!(bytes = self.memory.len(), "payload spilled to temp file");
                    self.memory = Vec::new();
                    self.spill = Some(file);
                }
            }
        }
        Ok(())
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn into_contents(self) -> PayloadContents {
        match self.spill {
            Some(file) => PayloadContents::Spilled(file),
            None => PayloadContents::Memory(self.memory),
        }
    }
}

/// Completed payload ready for handoff.
#[derive(Debug)]
pub enum PayloadContents {
    Memory(Vec<u8>),
    Spilled(NamedTempFile),
}

/// Destination for a finished payload. The executor neither knows nor
/// cares whether the key lands on local disk or a remote object store.
#[async_trait::async_trait]
pub trait PayloadStore: Send + Sync {
    async fn store(&self, sink: PayloadSink, key: &str) -> StorageResult<()>;
}

/// Filesystem-backed store: keys become paths under a root directory.
#[derive(Debug, Clone)]
pub struct FsPayloadStore {
    root: PathBuf,
}

impl FsPayloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait::async_trait]
impl PayloadStore for FsPayloadStore {
    async fn store(&self, sink: PayloadSink, key: &str) -> StorageResult<()> {
        let destination = self.path_for(key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        let total = sink.total_bytes();
        match sink.into_contents() {
            PayloadContents::Memory(bytes) => {
                tokio::fs::write(&destination, bytes)
                    .await
                    .map_err(|source| StorageError::Io {
                        source,
                        path: destination.clone(),
                    })?;
            }
            PayloadContents::Spilled(file) => {
                tokio::fs::copy(file.path(), &destination)
                    .await
                    .map_err(|source| StorageError::Io {
                        source,
                        path: destination.clone(),
                    })?;
            }
        }
        debug!(key, bytes = total, path = %destination.display(), "payload stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn small_payload_stays_in_memory() {
        let mut sink = PayloadSink::with_threshold(1024);
        sink.write(b"hello").unwrap();
        assert_eq!(sink.total_bytes(), 5);
        match sink.into_contents() {
            PayloadContents::Memory(bytes) => assert_eq!(bytes, b"hello"),
            PayloadContents::Spilled(_) => panic!("should not spill under threshold"),
        }
    }

    #[test]
    fn large_payload_spills_to_disk() {
        let mut sink = PayloadSink::with_threshold(8);
        sink.write(b"0123456789").unwrap();
        sink.write(b"abc").unwrap();
        assert_eq!(sink.total_bytes(), 13);
        match sink.into_contents() {
            PayloadContents::Spilled(file) => {
                let written = std::fs::read(file.path()).unwrap();
                assert_eq!(written, b"0123456789abc");
            }
            PayloadContents::Memory(_) => panic!("should have spilled"),
        }
    }

    #[tokio::test]
    async fn fs_store_writes_key_under_root() {
        let root = TempDir::new().unwrap();
        let store = FsPayloadStore::new(root.path());
        let mut sink = PayloadSink::new();
        sink.write(b"payload bytes").unwrap();
        store.store(sink, "media/out.mp4").await.unwrap();

        let stored = std::fs::read(root.path().join("media/out.mp4")).unwrap();
        assert_eq!(stored, b"payload bytes");
    }

    #[tokio::test]
    async fn fs_store_persists_spilled_payload() {
        let root = TempDir::new().unwrap();
        let store = FsPayloadStore::new(root.path());
        let mut sink = PayloadSink::with_threshold(4);
        sink.write(b"0123456789").unwrap();
        store.store(sink, "out.bin").await.unwrap();

        let stored = std::fs::read(root.path().join("out.bin")).unwrap();
        assert_eq!(stored, b"0123456789");
    }
}
