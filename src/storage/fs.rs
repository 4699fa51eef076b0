use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::layers::{Layer, PartitionKey};
use crate::storage::PartitionStore;

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &PartitionKey) -> PathBuf {
        self.root
            .join(key.layer.dir())
            .join(format!("{}.{}", key.name, key.layer.extension()))
    }
}

impl PartitionStore for FsStore {
    fn exists(&self, key: &PartitionKey) -> Result<bool> {
        Ok(self.path_of(key).is_file())
    }

    fn read(&self, key: &PartitionKey) -> Result<Vec<u8>> {
        let path = self.path_of(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PipelineError::FileNotFound {
                location: path.display().to_string(),
            }),
            Err(e) => Err(PipelineError::io(path.display().to_string(), e)),
        }
    }

    fn write(&self, key: &PartitionKey, bytes: &[u8]) -> Result<String> {
        let path = self.path_of(key);
        let location = path.display().to_string();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent).map_err(|e| PipelineError::io(parent.display().to_string(), e))?;

        // Same-directory temp file so the rename stays on one filesystem.
        let tmp = parent.join(format!(".{}.{}.tmp", key.name, key.layer.extension()));
        let written = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(PipelineError::io(location, e));
        }
        Ok(location)
    }

    fn list(&self, layer: Layer) -> Result<Vec<PartitionKey>> {
        let dir = self.root.join(layer.dir());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::io(dir.display().to_string(), e)),
        };

        let suffix = format!(".{}", layer.extension());
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(dir.display().to_string(), e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(suffix.as_str()) {
                keys.push(PartitionKey {
                    layer,
                    name: name.to_string(),
                });
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn location(&self, key: &PartitionKey) -> String {
        self.path_of(key).display().to_string()
    }
}
