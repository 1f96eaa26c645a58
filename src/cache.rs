use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use facefind_vision::Embedding;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Identifies one embedding: the image, its modification time, and the model that made it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub path: PathBuf,
    pub modified: u128,
    pub model: String,
}

impl CacheKey {
    /// Build a key from the file's current metadata. `None` if the file cannot be stat'ed.
    pub fn for_file(path: &Path, model: &str) -> Option<Self> {
        let modified = std::fs::metadata(path).ok()?.modified().ok()?;
        let modified = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();
        Some(Self {
            path: path.to_path_buf(),
            modified,
            model: model.to_string(),
        })
    }
}

/// Optional store the matcher consults before running the extractor.
pub trait EmbeddingCache {
    fn get(&self, key: &CacheKey) -> Option<Embedding>;

    fn put(&mut self, key: CacheKey, embedding: Embedding);

    /// Persist pending writes. In-memory caches have nothing to do.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<CacheKey, Vec<f32>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EmbeddingCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Embedding> {
        self.entries
            .get(key)
            .map(|v| Embedding::from_vec(v.clone()))
    }

    fn put(&mut self, key: CacheKey, embedding: Embedding) {
        self.entries.insert(key, embedding.to_vec());
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    key: CacheKey,
    embedding: Vec<f32>,
}

/// [`MemoryCache`] persisted to a single postcard file.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    memory: MemoryCache,
    dirty: bool,
}

impl FileCache {
    /// Load the cache at `path`. A missing or undecodable file starts empty; the latter is
    /// overwritten on the next [`flush`](EmbeddingCache::flush) that has something to write.
    pub fn load(path: &Path) -> Result<Self> {
        let mut memory = MemoryCache::new();
        if path.exists() {
            let data =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            match postcard::from_bytes::<Vec<CacheRecord>>(&data) {
                Ok(records) => {
                    for record in records {
                        memory.entries.insert(record.key, record.embedding);
                    }
                    log::debug!(
                        "loaded {} cached embedding(s) from {}",
                        memory.len(),
                        path.display()
                    );
                }
                Err(e) => {
                    log::warn!(
                        "ignoring damaged embedding cache {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            memory,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Drop entries whose image no longer exists or has been modified since.
    pub fn retain_fresh(&mut self) {
        let before = self.memory.len();
        self.memory.entries.retain(|key, _| {
            CacheKey::for_file(&key.path, &key.model).as_ref() == Some(key)
        });
        if self.memory.len() != before {
            self.dirty = true;
        }
    }
}

impl EmbeddingCache for FileCache {
    fn get(&self, key: &CacheKey) -> Option<Embedding> {
        self.memory.get(key)
    }

    fn put(&mut self, key: CacheKey, embedding: Embedding) {
        self.memory.put(key, embedding);
        self.dirty = true;
    }

    /// Write the cache back if anything changed.
    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let records: Vec<CacheRecord> = self
            .memory
            .entries
            .iter()
            .map(|(key, embedding)| CacheRecord {
                key: key.clone(),
                embedding: embedding.clone(),
            })
            .collect();
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;
        let data = postcard::to_allocvec(&records)?;

        // Rename into place; an interrupted flush leaves the previous file intact
        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temporary file in {}", parent.display()))?;
        tmp.write_all(&data)?;
        tmp.persist(&self.path)
            .with_context(|| format!("writing {}", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }
}
