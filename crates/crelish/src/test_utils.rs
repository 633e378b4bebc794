use crate::config::CrelishConfig;
use crate::processors::ProcessorRegistry;
use crate::store::FileStore;
use crate::Crelish;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// File-backed type with a slug widget and a date transform.
pub const EVENT_SCHEMA: &str = r#"{
    "label": "Event",
    "sortDefault": {"startDate": "SORT_DESC"},
    "fields": [
        {"key": "title", "label": "Title", "type": "textInput",
         "rules": ["required", ["string", {"max": 120}]],
         "visibleInGrid": true, "sortable": true},
        {"key": "startDate", "label": "Start", "type": "textInput", "transform": "date",
         "visibleInGrid": true, "sortable": true},
        {"key": "slug", "label": "Slug", "type": "widget_slug", "config": {"source": "title"}},
        {"key": "tags", "label": "Tags", "type": "checkboxList"}
    ]
}"#;

/// Relational type with a unique code and a multi-valued relation.
pub const ARTICLE_SCHEMA: &str = r#"{
    "label": "Article",
    "storage": "db",
    "fields": [
        {"key": "headline", "label": "Headline", "type": "textInput",
         "rules": ["required"], "visibleInGrid": true},
        {"key": "code", "label": "Code", "type": "textInput", "rules": ["unique"]},
        {"key": "body", "label": "Body", "type": "textarea"},
        {"key": "authors", "label": "Authors", "type": "relationSelect",
         "config": {"ctype": "person", "multiple": true}}
    ]
}"#;

pub struct TestEnv {
    // We keep _temp_dir to ensure the directory is not dropped until the test is done
    pub _temp_dir: TempDir,
    pub root: PathBuf,
    pub crelish: Crelish,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// A content root with the `event` and `article` schemas.
    pub fn new() -> Self {
        Self::with_registry(ProcessorRegistry::with_builtins())
    }

    pub fn with_registry(registry: ProcessorRegistry) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        let config = Self::config_for(&root);

        let schema_dir = config.schema_dir();
        fs::create_dir_all(&schema_dir).expect("failed to create schema dir");
        fs::write(schema_dir.join("event.json"), EVENT_SCHEMA).expect("failed to write schema");
        fs::write(schema_dir.join("article.json"), ARTICLE_SCHEMA).expect("failed to write schema");

        let crelish = Crelish::open_with_registry(config, registry).expect("failed to open crelish");
        Self {
            _temp_dir: temp_dir,
            root,
            crelish,
        }
    }

    /// Content root at `root`, in-memory database, no cache expiry.
    pub fn config_for(root: &std::path::Path) -> CrelishConfig {
        CrelishConfig {
            database: Some(crate::config::IN_MEMORY_DATABASE.to_string()),
            cache_ttl_secs: 0,
            ..CrelishConfig::with_root(root)
        }
    }

    pub fn write_schema(&self, ctype: &str, document: &str) {
        let path = self.crelish.schemas().path_for(ctype);
        fs::write(path, document).expect("failed to write schema");
    }

    pub fn file_store(&self) -> &FileStore {
        self.crelish.storage().file_store()
    }
}
