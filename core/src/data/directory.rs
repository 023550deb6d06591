//! Content Directory
//!
//! Maps content hashes to local files and answers local searches.
//! Populated by walking the shared folder or by adding files directly.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::file_record::FileRecord;
use super::hash::ContentHasher;
use super::query::Query;

/// Local index of shared files, keyed by content hash
pub struct ContentDirectory {
    hasher: Arc<dyn ContentHasher>,
    records: RwLock<HashMap<String, FileRecord>>,
}

impl std::fmt::Debug for ContentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDirectory").finish_non_exhaustive()
    }
}

impl ContentDirectory {
    pub fn new(hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            hasher,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn hasher(&self) -> &Arc<dyn ContentHasher> {
        &self.hasher
    }

    /// Hash and index a single file
    ///
    /// Returns the record and whether it was new to the directory.
    pub async fn add_file(&self, path: &Path) -> io::Result<(FileRecord, bool)> {
        let record = hash_record(self.hasher.clone(), path.to_path_buf()).await?;
        let inserted = self.insert(record.clone()).await;
        Ok((record, inserted))
    }

    /// Add an already-built record. Returns false if the hash was present.
    pub async fn insert(&self, record: FileRecord) -> bool {
        let mut records = self.records.write().await;
        records.insert(record.hash.clone(), record).is_none()
    }

    /// Drop every record stored at `path`; returns how many were dropped
    pub async fn remove_path(&self, path: &Path) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.path() != path);
        before - records.len()
    }

    pub async fn get(&self, hash: &str) -> Option<FileRecord> {
        self.records.read().await.get(hash).cloned()
    }

    pub async fn contains(&self, hash: &str) -> bool {
        self.records.read().await.contains_key(hash)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<FileRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Records whose names match `query`
    pub async fn search(&self, query: &str) -> Vec<FileRecord> {
        let Some(query) = Query::parse(query) else {
            debug!(query = query, "ignoring empty query");
            return Vec::new();
        };
        self.records
            .read()
            .await
            .values()
            .filter(|r| query.matches(&r.name))
            .cloned()
            .collect()
    }

    /// Walk `folder` recursively and index every visible file
    ///
    /// The folder is created if missing. Hidden entries (leading `.`) and
    /// unreadable entries are skipped. Returns the number of new records.
    pub async fn index_folder(&self, folder: &Path) -> io::Result<usize> {
        tokio::fs::create_dir_all(folder).await?;

        let mut pending: Vec<PathBuf> = vec![folder.to_path_buf()];
        let mut added = 0usize;

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_hidden(&path) {
                    continue;
                }
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    match self.add_file(&path).await {
                        Ok((_, true)) => added += 1,
                        Ok((_, false)) => {}
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "skipping unreadable file");
                        }
                    }
                }
            }
        }

        info!(folder = %folder.display(), added = added, "indexed shared folder");
        Ok(added)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

async fn hash_record(hasher: Arc<dyn ContentHasher>, path: PathBuf) -> io::Result<FileRecord> {
    tokio::task::spawn_blocking(move || {
        let meta = std::fs::metadata(&path)?;
        let hash = hasher.hash_file(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileRecord::new(name, hash, meta.len(), path))
    })
    .await
    .map_err(io::Error::other)?
}
