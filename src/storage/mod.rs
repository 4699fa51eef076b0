pub mod fs;
pub mod memory;

use crate::error::Result;
use crate::layers::{Layer, PartitionKey};

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Date-partitioned file store. Each key names exactly one file; writes
/// replace the whole file at once and never append.
pub trait PartitionStore: Send + Sync {
    fn exists(&self, key: &PartitionKey) -> Result<bool>;

    /// Fails with `FileNotFound` when the partition is absent.
    fn read(&self, key: &PartitionKey) -> Result<Vec<u8>>;

    fn write(&self, key: &PartitionKey, bytes: &[u8]) -> Result<String>;

    fn list(&self, layer: Layer) -> Result<Vec<PartitionKey>>;

    fn location(&self, key: &PartitionKey) -> String;

    fn read_optional(&self, key: &PartitionKey) -> Result<Option<Vec<u8>>> {
        if self.exists(key)? {
            self.read(key).map(Some)
        } else {
            Ok(None)
        }
    }
}
