//! URL slug lookup: `slug -> {ctype, uuid}`.
//!
//! Kept in `<content_root>/slugs.json` and rewritten atomically on every
//! change. A record owns at most one slug; saving it with a new slug drops
//! the old mapping.

use super::write_atomic;
use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlugTarget {
    pub ctype: String,
    pub uuid: String,
}

pub struct SlugStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SlugStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, SlugTarget>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                // Rebuilt from scratch by the next write.
                warn!(path = %self.path.display(), error = %e, "slug index is corrupt, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn store(&self, map: &BTreeMap<String, SlugTarget>) -> Result<()> {
        let content = serde_json::to_vec_pretty(map)?;
        write_atomic(&self.path, &content)
    }

    /// Point `slug` at the record, dropping any other slug the record had.
    pub fn upsert(&self, slug: &str, ctype: &str, uuid: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.load()?;
        map.retain(|key, target| key == slug || !(target.uuid == uuid && target.ctype == ctype));
        let target = SlugTarget {
            ctype: ctype.to_string(),
            uuid: uuid.to_string(),
        };
        if map.get(slug) == Some(&target) {
            return Ok(());
        }
        if let Some(previous) = map.insert(slug.to_string(), target) {
            debug!(slug, previous = %previous.uuid, uuid, "slug reassigned");
        }
        self.store(&map)
    }

    /// Remove every slug pointing at `uuid`. Returns how many were removed.
    pub fn remove_uuid(&self, uuid: &str) -> Result<usize> {
        let _guard = self.lock.lock();
        let mut map = self.load()?;
        let before = map.len();
        map.retain(|_, target| target.uuid != uuid);
        let removed = before - map.len();
        if removed > 0 {
            self.store(&map)?;
        }
        Ok(removed)
    }

    pub fn resolve(&self, slug: &str) -> Result<Option<SlugTarget>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(slug))
    }
}
