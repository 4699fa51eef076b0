use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{PipelineError, Result};
use crate::layers::{Layer, PartitionKey};
use crate::storage::PartitionStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<PartitionKey, Vec<u8>>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|guard| *guard).unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<PartitionKey> {
        self.files
            .lock()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> PipelineError {
    PipelineError::io(
        "memory",
        std::io::Error::new(std::io::ErrorKind::Other, "memory store mutex poisoned"),
    )
}

impl PartitionStore for MemoryStore {
    fn exists(&self, key: &PartitionKey) -> Result<bool> {
        let guard = self.files.lock().map_err(|_| poisoned())?;
        Ok(guard.contains_key(key))
    }

    fn read(&self, key: &PartitionKey) -> Result<Vec<u8>> {
        let guard = self.files.lock().map_err(|_| poisoned())?;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::FileNotFound {
                location: self.location(key),
            })
    }

    fn write(&self, key: &PartitionKey, bytes: &[u8]) -> Result<String> {
        let mut guard = self.files.lock().map_err(|_| poisoned())?;
        guard.insert(key.clone(), bytes.to_vec());
        let mut writes = self.writes.lock().map_err(|_| poisoned())?;
        *writes += 1;
        Ok(self.location(key))
    }

    fn list(&self, layer: Layer) -> Result<Vec<PartitionKey>> {
        let guard = self.files.lock().map_err(|_| poisoned())?;
        Ok(guard.keys().filter(|k| k.layer == layer).cloned().collect())
    }

    fn location(&self, key: &PartitionKey) -> String {
        format!("memory://{}", key.relative_path())
    }
}
