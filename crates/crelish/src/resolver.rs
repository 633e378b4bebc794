//! # Model Resolver
//!
//! Maps a content type to the model that carries its specialised behaviour
//! in relational mode (today: which table it lives in).
//!
//! Models are described by small JSON documents in the models directory:
//!
//! ```json
//! { "name": "BlogPost", "ctype": "post", "table": "blog_posts" }
//! ```
//!
//! Resolution order for a ctype:
//!
//! 1. a descriptor registered with [`ModelResolver::register`];
//! 2. a discovered, non-abstract descriptor declaring that `ctype`;
//! 3. a discovered descriptor named after the ctype by convention
//!    (`event` -> `Event`);
//! 4. otherwise [`CrelishError::ModelNotFound`].
//!
//! The discovered map is cached in `<cache_dir>/model_map.json` and rebuilt
//! when any descriptor (or the directory itself) is newer than the cache.
//! Debug mode skips the cache file and rescans on every lookup.

use crate::error::{CrelishError, Result};
use crate::store::write_atomic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

pub const MODEL_MAP_FILE: &str = "model_map.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ctype: None,
            table: None,
            is_abstract: false,
        }
    }

    pub fn for_ctype(mut self, ctype: impl Into<String>) -> Self {
        self.ctype = Some(ctype.into());
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Explicit table, else the lowercased ctype, else the lowercased name.
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .or_else(|| self.ctype.as_ref().map(|c| c.to_ascii_lowercase()))
            .unwrap_or_else(|| self.name.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMap {
    pub by_ctype: BTreeMap<String, ModelDescriptor>,
    pub by_name: BTreeMap<String, ModelDescriptor>,
}

/// `event` -> `Event`.
pub fn conventional_name(ctype: &str) -> String {
    let mut chars = ctype.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub struct ModelResolver {
    models_dir: PathBuf,
    cache_file: Option<PathBuf>,
    debug: bool,
    discovered: RwLock<Option<Arc<ModelMap>>>,
    registered: RwLock<BTreeMap<String, ModelDescriptor>>,
}

impl ModelResolver {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            cache_file: None,
            debug: false,
            discovered: RwLock::new(None),
            registered: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl AsRef<Path>) -> Self {
        self.cache_file = Some(cache_dir.as_ref().join(MODEL_MAP_FILE));
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Register a model programmatically. Takes precedence over discovery.
    pub fn register(&self, descriptor: ModelDescriptor) {
        let key = descriptor
            .ctype
            .clone()
            .unwrap_or_else(|| descriptor.name.to_ascii_lowercase());
        self.registered.write().insert(key, descriptor);
    }

    pub fn resolve(&self, ctype: &str) -> Result<ModelDescriptor> {
        if let Some(found) = self.registered.read().get(ctype) {
            return Ok(found.clone());
        }
        let map = self.map()?;
        if let Some(found) = map.by_ctype.get(ctype) {
            return Ok(found.clone());
        }
        if let Some(found) = map.by_name.get(&conventional_name(ctype)) {
            return Ok(found.clone());
        }
        Err(CrelishError::ModelNotFound(ctype.to_string()))
    }

    pub fn exists(&self, ctype: &str) -> bool {
        self.resolve(ctype).is_ok()
    }

    /// Drop the in-memory map and the cache file; the next lookup rescans.
    pub fn refresh(&self) -> Result<()> {
        *self.discovered.write() = None;
        if let Some(cache) = &self.cache_file {
            match fs::remove_file(cache) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// The discovered map, shared until the next refresh.
    pub fn map(&self) -> Result<Arc<ModelMap>> {
        if self.debug {
            return self.discover().map(Arc::new);
        }
        if let Some(map) = self.discovered.read().as_ref() {
            return Ok(Arc::clone(map));
        }

        let mut discovered = self.discovered.write();
        if let Some(map) = discovered.as_ref() {
            return Ok(Arc::clone(map));
        }
        let map = match self.read_cache()? {
            Some(map) => map,
            None => {
                let map = self.discover()?;
                self.write_cache(&map);
                map
            }
        };
        let map = Arc::new(map);
        *discovered = Some(Arc::clone(&map));
        Ok(map)
    }

    fn descriptor_paths(&self) -> Result<Vec<PathBuf>> {
        if !self.models_dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.models_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Scan the models directory.
    pub fn discover(&self) -> Result<ModelMap> {
        let mut map = ModelMap::default();
        for path in self.descriptor_paths()? {
            let parsed = fs::read_to_string(&path)
                .map_err(CrelishError::from)
                .and_then(|c| serde_json::from_str::<ModelDescriptor>(&c).map_err(CrelishError::from));
            let descriptor = match parsed {
                Ok(d) => d,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable model descriptor");
                    continue;
                }
            };
            if descriptor.is_abstract {
                continue;
            }
            if let Some(ctype) = &descriptor.ctype {
                map.by_ctype.insert(ctype.clone(), descriptor.clone());
            }
            map.by_name.insert(descriptor.name.clone(), descriptor);
        }
        debug!(dir = %self.models_dir.display(), models = map.by_name.len(), "model map rebuilt");
        Ok(map)
    }

    fn newest_source_mtime(&self) -> Result<Option<SystemTime>> {
        let mut newest = None;
        if self.models_dir.exists() {
            newest = fs::metadata(&self.models_dir)?.modified().ok();
        }
        for path in self.descriptor_paths()? {
            let modified = fs::metadata(&path)?.modified().ok();
            newest = newest.max(modified);
        }
        Ok(newest)
    }

    fn read_cache(&self) -> Result<Option<ModelMap>> {
        let Some(cache) = &self.cache_file else {
            return Ok(None);
        };
        let Ok(meta) = fs::metadata(cache) else {
            return Ok(None);
        };
        let cache_mtime = meta.modified().ok();
        if cache_mtime.is_none() || self.newest_source_mtime()? > cache_mtime {
            debug!(cache = %cache.display(), "model map cache is stale");
            return Ok(None);
        }
        let content = fs::read_to_string(cache)?;
        match serde_json::from_str(&content) {
            Ok(map) => Ok(Some(map)),
            Err(e) => {
                warn!(cache = %cache.display(), error = %e, "ignoring unreadable model map cache");
                Ok(None)
            }
        }
    }

    fn write_cache(&self, map: &ModelMap) {
        let Some(cache) = &self.cache_file else {
            return;
        };
        let result = serde_json::to_vec_pretty(map)
            .map_err(CrelishError::from)
            .and_then(|content| write_atomic(cache, &content));
        if let Err(e) = result {
            warn!(cache = %cache.display(), error = %e, "could not write model map cache");
        }
    }
}
