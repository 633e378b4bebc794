//! # Data Manager
//!
//! The query façade callers use to read content. A manager is bound to one
//! content type and one set of [`QuerySettings`]; it never branches on the
//! storage mode, the backend it was handed does.
//!
//! ```ignore
//! let page = crelish
//!     .data("event")?
//!     .settings(QuerySettings::from_value(&json!({"filter": {"state": 2}}))?)
//!     .all()?;
//! ```

use crate::error::{CrelishError, Result};
use crate::model::{Attributes, Record, CREATED};
use crate::query::{Page, QuerySettings, SortDirection, SortSpec};
use crate::schema::ContentTypeSchema;
use crate::store::StorageBackend;
use serde::Serialize;
use std::sync::Arc;

/// A grid column of a content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    pub sortable: bool,
}

pub struct DataManager {
    schema: Arc<ContentTypeSchema>,
    backend: Arc<dyn StorageBackend>,
    settings: QuerySettings,
    uuid: Option<String>,
    default_page_size: usize,
}

impl DataManager {
    pub fn new(
        schema: Arc<ContentTypeSchema>,
        backend: Arc<dyn StorageBackend>,
        default_page_size: usize,
    ) -> Self {
        Self {
            schema,
            backend,
            settings: QuerySettings::new(),
            uuid: None,
            default_page_size,
        }
    }

    pub fn settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn uuid(mut self, uuid: impl Into<String>) -> Self {
        let uuid: String = uuid.into();
        self.uuid = Some(uuid).filter(|u| !u.is_empty());
        self
    }

    pub fn schema(&self) -> &ContentTypeSchema {
        &self.schema
    }

    /// The record with the bound uuid, or else the first filter match.
    pub fn one(&self) -> Result<Option<Record>> {
        if let Some(uuid) = &self.uuid {
            return self.backend.find_one(&self.schema, uuid);
        }
        let mut found =
            self.backend
                .find_all(&self.schema, &self.settings.filter, &self.sorting(), Some(1))?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    pub fn all(&self) -> Result<Page<Record>> {
        let page_size = self.settings.page_size.unwrap_or(self.default_page_size);
        self.backend.get_page(
            &self.schema,
            &self.settings.filter,
            &self.sorting(),
            page_size,
            self.settings.page.max(1),
        )
    }

    /// Every matching record in stored form, unpaged and unprocessed.
    pub fn raw_all(&self) -> Result<Vec<Attributes>> {
        self.backend
            .find_all_raw(&self.schema, &self.settings.filter, &self.sorting(), None)
    }

    /// Delete the bound record.
    pub fn delete(&self) -> Result<bool> {
        let uuid = self
            .uuid
            .as_deref()
            .ok_or_else(|| CrelishError::RecordNotFound {
                ctype: self.schema.type_name.clone(),
                uuid: String::new(),
            })?;
        self.backend.delete(&self.schema, uuid)
    }

    pub fn columns(&self) -> Vec<Column> {
        self.schema
            .grid_fields()
            .map(|field| Column {
                key: field.key.clone(),
                label: field.label.clone(),
                sortable: field.sortable.is_enabled(),
            })
            .collect()
    }

    /// Explicit sort, else the schema's default, else newest first.
    pub fn sorting(&self) -> SortSpec {
        if !self.settings.sort.is_empty() {
            return self.settings.sort.clone();
        }
        match &self.schema.sort_default {
            Some(default) => SortSpec::new().by(default.field.clone(), default.direction),
            None => SortSpec::new().by(CREATED, SortDirection::Desc),
        }
    }
}
