//! JSON-backed library manifest: name-keyed records persisted as a sorted array.

use crate::error::ManifestError;
use crate::models::{round1, ImageRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStats {
    pub count: usize,
    pub total_original_size: u64,
    pub total_optimized_size: u64,
    pub total_thumbnail_size: u64,
    /// Overall percentage saved by the optimized derivatives, one decimal.
    pub avg_compression: f64,
}

#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    records: HashMap<String, ImageRecord>,
    dirty: bool,
}

impl ManifestStore {
    /// Empty store bound to `path`; nothing is read or written.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: HashMap::new(),
            dirty: false,
        }
    }

    /// Loads the manifest at `path`. A missing or unparsable file yields an
    /// empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        let bytes = match tokio::fs::read(&store.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no manifest at {}, starting empty", store.path.display());
                return store;
            }
            Err(e) => {
                warn!("cannot read manifest {}: {e}; starting empty", store.path.display());
                return store;
            }
        };
        match serde_json::from_slice::<Vec<ImageRecord>>(&bytes) {
            Ok(records) => {
                for record in records {
                    store.records.insert(record.name.clone(), record);
                }
            }
            Err(e) => {
                warn!("manifest {} is not valid JSON ({e}); starting empty", store.path.display());
            }
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&ImageRecord> {
        self.records.get(name)
    }

    pub fn upsert(&mut self, record: ImageRecord) {
        self.records.insert(record.name.clone(), record);
        self.dirty = true;
    }

    pub fn remove(&mut self, name: &str) -> Option<ImageRecord> {
        let removed = self.records.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when the in-memory state has changes not yet on disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Records ordered by name, the order they are persisted in.
    pub fn records(&self) -> Vec<&ImageRecord> {
        let mut out: Vec<&ImageRecord> = self.records.values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Writes every record to disk through a temp file and rename. On error
    /// the store stays dirty so the next call rewrites everything.
    pub async fn persist(&mut self) -> Result<(), ManifestError> {
        let mut bytes = serde_json::to_vec_pretty(&self.records())?;
        bytes.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        self.dirty = false;
        debug!("persisted {} records to {}", self.records.len(), self.path.display());
        Ok(())
    }

    pub fn stats(&self) -> ManifestStats {
        let mut stats = ManifestStats {
            count: self.records.len(),
            ..ManifestStats::default()
        };
        for record in self.records.values() {
            stats.total_original_size += record.original_size;
            stats.total_optimized_size += record.optimized_size;
            stats.total_thumbnail_size += record.thumbnail_size;
        }
        if stats.total_original_size > 0 {
            let saved = stats.total_original_size as f64 - stats.total_optimized_size as f64;
            stats.avg_compression = round1(saved / stats.total_original_size as f64 * 100.0);
        }
        stats
    }
}
