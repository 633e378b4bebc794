//! # Crelish Architecture
//!
//! Crelish is a **schema-driven content store**. Content types are described
//! by JSON schema documents; records of a type live either as JSON documents
//! on disk or as rows in a SQLite table, and callers cannot tell which.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Façade (context.rs, manager.rs, dynamic.rs)                │
//! │  - Crelish: composition root, one per process               │
//! │  - DataManager: one(), all(), raw_all(), columns()          │
//! │  - DynamicModel: validate(), save(), delete()               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Field Processing (processors/)                             │
//! │  - Processors per field type, transformers per transform    │
//! │  - stored <-> processed, in both directions                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage (store/)                                           │
//! │  - StorageBackend trait, chosen per schema by the factory   │
//! │  - FileStore + RecordCache + SlugStore                      │
//! │  - RelationalStore (rusqlite), table names via resolver     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Schemas ([`schema`]) and the query grammar ([`query`]) are leaves every
//! layer shares.
//!
//! ## Two Shapes of a Record
//!
//! A record is **stored** in the form its processors produce (`state: 2`,
//! `startDate: "2024-01-01"`) and **returned** in processed form
//! (`state: "Online"`, `startDate: "01.01.2024"`). Filtering and sorting
//! always look at the stored form, on both backends.
//!
//! ## No I/O Assumptions
//!
//! The library never writes to stdout/stderr and never exits. Diagnostics go
//! through `tracing`; the CLI client decides where they end up.
//!
//! ## Module Overview
//!
//! - [`config`]: `crelish.toml` settings via confique
//! - [`init`]: config discovery and opening a site
//! - [`context`]: the [`Crelish`] composition root
//! - [`manager`]: [`DataManager`] query façade
//! - [`dynamic`]: [`DynamicModel`] record editing
//! - [`processors`]: field processor and transformer registry
//! - [`store`]: storage backends, cache, slugs
//! - [`resolver`]: content type to model descriptor mapping
//! - [`validation`]: rule checks and error collection
//! - [`error`]: [`CrelishError`]

pub mod config;
pub mod context;
pub mod dynamic;
pub mod error;
pub mod init;
pub mod manager;
pub mod model;
pub mod processors;
pub mod query;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod validation;
pub mod value;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use config::CrelishConfig;
pub use context::Crelish;
pub use dynamic::DynamicModel;
pub use error::{CrelishError, Result};
pub use manager::{Column, DataManager};
pub use model::{Attributes, Record, RecordState};
pub use query::{FilterSpec, Page, QuerySettings, SortSpec};
pub use schema::{ContentTypeSchema, FieldDefinition, StorageMode};
