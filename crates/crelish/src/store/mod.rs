//! # Storage Layer
//!
//! Records of a content type live in exactly one of two places, chosen by the
//! schema's `storage` key:
//!
//! | Mode | Implementation | Layout |
//! |------|----------------|--------|
//! | `file` (default) | [`fs_backend::FileStore`] | one JSON document per record |
//! | `relational` (`"db"`) | [`sql_backend::RelationalStore`] | one SQLite table per type |
//!
//! Both implement [`StorageBackend`] and hand back the same processed
//! [`Record`] shape, so nothing above this module branches on the mode.
//! [`StorageFactory`] makes the choice once per schema.
//!
//! ## Write Guarantees
//!
//! - A save writes the whole record or nothing: documents go through a temp
//!   file plus rename, rows through a single statement.
//! - Transient failures (interrupted I/O, a busy database) are retried a
//!   bounded number of times. A retry repeats the whole-record write, never a
//!   fragment of it.
//! - `is_new` decides insert vs update. Backends do not probe for existence.
//!
//! ## Storage Layout
//!
//! ```text
//! <content_root>/
//! ├── slugs.json            # slug -> {ctype, uuid}
//! ├── event/
//! │   └── {uuid}.json       # one stored record
//! └── crelish.sqlite        # relational content types
//! ```

pub mod cache;
pub mod fs_backend;
pub mod slugs;
pub mod sql_backend;

use crate::error::{CrelishError, Result};
use crate::model::{new_uuid, now_epoch, Attributes, Record, CREATED, STATE, UPDATED, UUID};
use crate::query::{FilterSpec, Page, SortSpec};
use crate::schema::{ContentTypeSchema, StorageMode};
use crate::value::is_empty;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub use cache::{CacheService, CachedRecord, MemoryCache, RecordCache};
pub use fs_backend::FileStore;
pub use slugs::{SlugStore, SlugTarget};
pub use sql_backend::RelationalStore;

/// Uniform record persistence for one storage mode.
///
/// Lookups that find nothing return `Ok(None)` / `Ok(false)`; errors are
/// reserved for I/O, database and processing failures.
pub trait StorageBackend: Send + Sync {
    fn mode(&self) -> StorageMode;

    fn find_one(&self, schema: &ContentTypeSchema, uuid: &str) -> Result<Option<Record>>;

    fn find_all(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<Record>>;

    /// Like [`StorageBackend::find_all`], but returns stored records untouched
    /// by processors.
    fn find_all_raw(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        limit: Option<usize>,
    ) -> Result<Vec<Attributes>>;

    /// `page` is 1-based.
    fn get_page(
        &self,
        schema: &ContentTypeSchema,
        filter: &FilterSpec,
        sort: &SortSpec,
        page_size: usize,
        page: usize,
    ) -> Result<Page<Record>> {
        let all = self.find_all(schema, filter, sort, None)?;
        Ok(Page::slice(all, page, page_size))
    }

    /// Persist a record given in storage form and return it processed.
    ///
    /// A missing `uuid` is minted. New records get `created`, existing ones
    /// `updated`.
    fn save(&self, schema: &ContentTypeSchema, data: Attributes, is_new: bool) -> Result<Record>;

    /// `Ok(false)` when there was nothing to delete.
    fn delete(&self, schema: &ContentTypeSchema, uuid: &str) -> Result<bool>;

    /// Replace the related uuids of a multi-valued relation field.
    fn sync_relations(&self, _ctype: &str, _uuid: &str, _field: &str, _related: &[String]) -> Result<()> {
        Ok(())
    }

    /// Drop anything the backend caches for `ctype`.
    fn flush(&self, _ctype: &str) {}
}

/// Picks the backend for a schema's storage mode.
///
/// The relational store is opened on first use, so installations without
/// relational types never create a database file.
pub struct StorageFactory {
    file: Arc<FileStore>,
    relational: OnceCell<Arc<RelationalStore>>,
    open_relational: Box<dyn Fn() -> Result<RelationalStore> + Send + Sync>,
}

impl StorageFactory {
    pub fn new<F>(file: Arc<FileStore>, open_relational: F) -> Self
    where
        F: Fn() -> Result<RelationalStore> + Send + Sync + 'static,
    {
        Self {
            file,
            relational: OnceCell::new(),
            open_relational: Box::new(open_relational),
        }
    }

    pub fn file_store(&self) -> &Arc<FileStore> {
        &self.file
    }

    pub fn relational_store(&self) -> Result<&Arc<RelationalStore>> {
        self.relational
            .get_or_try_init(|| (self.open_relational)().map(Arc::new))
    }

    pub fn for_mode(&self, mode: StorageMode) -> Result<Arc<dyn StorageBackend>> {
        let backend: Arc<dyn StorageBackend> = match mode {
            StorageMode::File => self.file.clone(),
            StorageMode::Relational => self.relational_store()?.clone(),
        };
        Ok(backend)
    }

    pub fn for_schema(&self, schema: &ContentTypeSchema) -> Result<Arc<dyn StorageBackend>> {
        self.for_mode(schema.storage_mode)
    }
}

/// Fill in identity and timestamps before a write.
///
/// `uuid` is minted only when absent, so an existing identifier is never
/// replaced.
pub fn stamp_system_fields(data: &mut Attributes, is_new: bool) -> String {
    let uuid = match data.get(UUID).and_then(Value::as_str) {
        Some(uuid) if !uuid.trim().is_empty() => uuid.trim().to_string(),
        _ => new_uuid(),
    };
    data.insert(UUID.to_string(), Value::String(uuid.clone()));

    let now = now_epoch();
    if is_new {
        if data.get(CREATED).map_or(true, is_empty) {
            data.insert(CREATED.to_string(), Value::from(now));
        }
        if data.get(STATE).map_or(true, is_empty) {
            data.insert(STATE.to_string(), Value::from(1));
        }
        data.entry(UPDATED.to_string()).or_insert(Value::Null);
    } else {
        data.insert(UPDATED.to_string(), Value::from(now));
    }
    uuid
}

/// Run `op`, retrying transient failures up to `retries` extra times.
pub fn with_retry<T>(retries: u32, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                warn!(attempt, operation = what, error = %e, "retrying after transient failure");
                std::thread::sleep(std::time::Duration::from_millis(10 * u64::from(attempt)));
            }
            other => return other,
        }
    }
}

/// Write via a temp file in the same directory, then rename over the target.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CrelishError::Store(format!("{} has no parent directory", path.display())))?;
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let tmp = dir.join(format!(".{}-{}.tmp", name, uuid::Uuid::new_v4()));
    if let Err(e) = fs::write(&tmp, content) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn stamps_new_records() {
        let mut data = Attributes::new();
        let uuid = stamp_system_fields(&mut data, true);
        assert_eq!(data["uuid"], json!(uuid));
        assert!(data["created"].is_i64());
        assert_eq!(data["state"], json!(1));
        assert_eq!(data["updated"], Value::Null);
    }

    #[test]
    fn existing_uuid_is_kept_and_updated_stamped() {
        let mut data = json!({"uuid": "keep-me", "created": 100, "state": 2})
            .as_object()
            .cloned()
            .unwrap();
        let uuid = stamp_system_fields(&mut data, false);
        assert_eq!(uuid, "keep-me");
        assert_eq!(data["created"], json!(100));
        assert!(data["updated"].as_i64().unwrap() >= 100);
        assert_eq!(data["state"], json!(2));
    }

    #[test]
    fn retries_only_transient_errors() {
        let calls = Cell::new(0);
        let result: Result<()> = with_retry(3, "test", || {
            calls.set(calls.get() + 1);
            Err(std::io::Error::new(std::io::ErrorKind::Interrupted, "again").into())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 4);

        calls.set(0);
        let result: Result<()> = with_retry(3, "test", || {
            calls.set(calls.get() + 1);
            Err(CrelishError::Store("permanent".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("doc.json");
        write_atomic(&target, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{}");
        let leftovers = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }
}
