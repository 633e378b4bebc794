//! # Configuration
//!
//! Crelish configuration is managed by [`confique`], layered from:
//! 1. **Environment variables**: `CRELISH_CONTENT_ROOT`, `CRELISH_DATABASE`, ...
//! 2. **Config file**: `crelish.toml` (see [`crate::init`] for where it is looked up).
//! 3. **Compiled defaults**: `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `content_root` | `data` | Root of the file-backed record directories |
//! | `schema_dir` | `<content_root>/elements` | Schema documents `{ctype}.json` |
//! | `models_dir` | `<content_root>/models` | Model descriptors |
//! | `cache_dir` | `<content_root>/.cache` | Model map cache |
//! | `database` | `<content_root>/crelish.sqlite` | SQLite file, or `:memory:` |
//! | `cache_ttl_secs` | `3600` | Record list cache TTL, `0` keeps entries until flushed |
//! | `cache_capacity` | `256` | Max cached content types |
//! | `page_size` | `30` | Default page size of listings |
//! | `pretty_json` | `true` | Pretty-print record documents |
//! | `write_retries` | `3` | Attempts for transient write failures |
//! | `debug` | `false` | Rescan model descriptors on every lookup |
//!
//! Relative paths are resolved against the directory of the config file.

use confique::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "crelish.toml";
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Configuration for crelish, stored in `crelish.toml`.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CrelishConfig {
    /// Root directory of the file-backed content types.
    #[config(env = "CRELISH_CONTENT_ROOT", default = "data")]
    pub content_root: PathBuf,

    /// Directory holding `{ctype}.json` schema documents.
    #[config(env = "CRELISH_SCHEMA_DIR")]
    pub schema_dir: Option<PathBuf>,

    #[config(env = "CRELISH_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    #[config(env = "CRELISH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// SQLite database for relational content types; `:memory:` keeps it in memory.
    #[config(env = "CRELISH_DATABASE")]
    pub database: Option<String>,

    #[config(env = "CRELISH_CACHE_TTL", default = 3600)]
    pub cache_ttl_secs: u64,

    #[config(default = 256)]
    pub cache_capacity: u64,

    #[config(default = 30)]
    pub page_size: usize,

    #[config(default = true)]
    pub pretty_json: bool,

    #[config(default = 3)]
    pub write_retries: u32,

    #[config(env = "CRELISH_DEBUG", default = false)]
    pub debug: bool,
}

impl Default for CrelishConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("data"),
            schema_dir: None,
            models_dir: None,
            cache_dir: None,
            database: None,
            cache_ttl_secs: 3600,
            cache_capacity: 256,
            page_size: 30,
            pretty_json: true,
            write_retries: 3,
            debug: false,
        }
    }
}

/// Where the relational store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    Memory,
}

impl CrelishConfig {
    /// A default configuration rooted at `content_root`.
    pub fn with_root(content_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            ..Default::default()
        }
    }

    /// Load from `file` (ignored when missing), environment and defaults.
    pub fn load(file: &Path) -> crate::error::Result<Self> {
        let config = CrelishConfig::builder().env().file(file).load()?;
        Ok(config)
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.schema_dir
            .clone()
            .unwrap_or_else(|| self.content_root.join("elements"))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| self.content_root.join("models"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.content_root.join(".cache"))
    }

    pub fn database_location(&self) -> DatabaseLocation {
        match self.database.as_deref().map(str::trim) {
            Some(IN_MEMORY_DATABASE) => DatabaseLocation::Memory,
            Some(path) if !path.is_empty() => DatabaseLocation::File(PathBuf::from(path)),
            _ => DatabaseLocation::File(self.content_root.join("crelish.sqlite")),
        }
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_relative_to(mut self, base: &Path) -> Self {
        let absolute = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.content_root = absolute(self.content_root);
        self.schema_dir = self.schema_dir.map(absolute);
        self.models_dir = self.models_dir.map(absolute);
        self.cache_dir = self.cache_dir.map(absolute);
        self.database = self.database.map(|db| {
            if db.trim() == IN_MEMORY_DATABASE {
                db
            } else {
                absolute(PathBuf::from(db)).to_string_lossy().into_owned()
            }
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CrelishConfig::default();
        assert_eq!(config.content_root, PathBuf::from("data"));
        assert_eq!(config.schema_dir(), PathBuf::from("data/elements"));
        assert_eq!(config.page_size, 30);
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_database_location() {
        let mut config = CrelishConfig::with_root("/srv/site");
        assert_eq!(
            config.database_location(),
            DatabaseLocation::File(PathBuf::from("/srv/site/crelish.sqlite"))
        );
        config.database = Some(":memory:".to_string());
        assert_eq!(config.database_location(), DatabaseLocation::Memory);
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let config = CrelishConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.cache_ttl(), None);
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let config = CrelishConfig {
            schema_dir: Some(PathBuf::from("/abs/elements")),
            database: Some("db/site.sqlite".to_string()),
            ..Default::default()
        }
        .resolve_relative_to(Path::new("/srv/site"));
        assert_eq!(config.content_root, PathBuf::from("/srv/site/data"));
        assert_eq!(config.schema_dir(), PathBuf::from("/abs/elements"));
        assert_eq!(config.database.as_deref(), Some("/srv/site/db/site.sqlite"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "content_root = \"content\"\npage_size = 10\n").unwrap();
        let config = CrelishConfig::load(&path).unwrap();
        assert_eq!(config.content_root, PathBuf::from("content"));
        assert_eq!(config.page_size, 10);
        assert!(config.pretty_json);
    }
}
