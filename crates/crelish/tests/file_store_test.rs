use crelish::query::{FilterSpec, QuerySettings};
use crelish::store::StorageBackend;
use crelish::{Crelish, CrelishConfig};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

const EVENT: &str = r#"{
    "label": "Event",
    "fields": [
        {"key": "title", "label": "Title", "type": "textInput", "rules": ["required"]},
        {"key": "startDate", "label": "Start", "type": "textInput", "transform": "date"},
        {"key": "price", "label": "Price", "type": "textInput"},
        {"key": "gadget", "label": "Gadget", "type": "hologramPicker"}
    ]
}"#;

fn setup() -> (TempDir, Crelish) {
    let dir = TempDir::new().unwrap();
    let config = CrelishConfig {
        database: Some(":memory:".to_string()),
        cache_ttl_secs: 0,
        ..CrelishConfig::with_root(dir.path())
    };
    let schema_dir = config.schema_dir();
    fs::create_dir_all(&schema_dir).unwrap();
    fs::write(schema_dir.join("event.json"), EVENT).unwrap();
    let crelish = Crelish::open(config).unwrap();
    (dir, crelish)
}

fn save(crelish: &Crelish, values: Value) -> String {
    let mut model = crelish.model("event").unwrap();
    model.set_attributes(values.as_object().cloned().unwrap());
    let record = model.try_save().unwrap();
    record.uuid().unwrap().to_string()
}

fn titles(crelish: &Crelish, filter: FilterSpec) -> Vec<String> {
    let mut titles: Vec<String> = crelish
        .data("event")
        .unwrap()
        .settings(QuerySettings::new().filter(filter))
        .raw_all()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap().to_string())
        .collect();
    titles.sort();
    titles
}

#[test]
fn test_saved_event_on_disk_and_processed() {
    let (dir, crelish) = setup();
    let uuid = save(&crelish, json!({"title": "Launch", "startDate": "2024-01-01"}));

    let path = dir.path().join("event").join(format!("{}.json", uuid));
    let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(stored["uuid"], json!(uuid));
    assert_eq!(stored["title"], json!("Launch"));
    assert_eq!(stored["startDate"], json!("2024-01-01"));
    assert_eq!(stored["state"], json!(1));
    assert!(stored["created"].is_i64());
    assert!(stored.get("ctype").is_none());

    let record = crelish.data("event").unwrap().uuid(&uuid).one().unwrap().unwrap();
    assert_eq!(record.get("title"), Some(&json!("Launch")));
    assert_eq!(record.get("startDate"), Some(&json!("01.01.2024")));
    assert_eq!(record.get("state"), Some(&json!("Draft")));
    assert_eq!(record.get("ctype"), Some(&json!("event")));
}

#[test]
fn test_round_trip_keeps_plain_text_byte_identical() {
    let (_dir, crelish) = setup();
    let text = "  Ünïcödé, \"quotes\" and\nnewlines  ";
    let uuid = save(&crelish, json!({"title": text}));
    let record = crelish.data("event").unwrap().uuid(&uuid).one().unwrap().unwrap();
    assert_eq!(record.get_str("title"), Some(text));
}

#[test]
fn test_unknown_field_type_passes_through() {
    let (_dir, crelish) = setup();
    let gadget = json!({"beam": [1, 2, 3], "color": "teal"});
    let uuid = save(&crelish, json!({"title": "Holo", "gadget": gadget.clone()}));
    let record = crelish.data("event").unwrap().uuid(&uuid).one().unwrap().unwrap();
    assert_eq!(record.get("gadget"), Some(&gadget));
}

#[test]
fn test_writes_are_visible_without_rescan() {
    let (_dir, crelish) = setup();
    save(&crelish, json!({"title": "First"}));

    // Warm the cache.
    assert_eq!(crelish.data("event").unwrap().all().unwrap().total_count, 1);
    let store = crelish.storage().file_store();
    let scans = store.scan_count();

    let uuid = save(&crelish, json!({"title": "Second"}));
    let page = crelish.data("event").unwrap().all().unwrap();
    assert_eq!(page.total_count, 2);
    assert_eq!(store.scan_count(), scans);

    assert!(crelish.data("event").unwrap().uuid(&uuid).delete().unwrap());
    let page = crelish.data("event").unwrap().all().unwrap();
    assert_eq!(page.total_count, 1);
    assert_eq!(page.items[0].get_str("title"), Some("First"));
    assert_eq!(store.scan_count(), scans);
}

#[test]
fn test_corrupt_documents_are_skipped() {
    let (dir, crelish) = setup();
    save(&crelish, json!({"title": "Good"}));
    fs::write(dir.path().join("event").join("broken.json"), "{ not json").unwrap();
    fs::write(dir.path().join("event").join("list.json"), "[1, 2]").unwrap();
    crelish.flush_cache("event");

    let page = crelish.data("event").unwrap().all().unwrap();
    assert_eq!(page.total_count, 1);
}

#[test]
fn test_documents_from_an_older_schema_are_backfilled() {
    let (dir, crelish) = setup();
    fs::create_dir_all(dir.path().join("event")).unwrap();
    fs::write(
        dir.path().join("event").join("legacy-1.json"),
        r#"{"uuid": "legacy-1", "title": "Old", "state": 2}"#,
    )
    .unwrap();

    let record = crelish.data("event").unwrap().uuid("legacy-1").one().unwrap().unwrap();
    assert_eq!(record.get("state"), Some(&json!("Online")));
    assert_eq!(record.get("price"), Some(&Value::Null));
    assert_eq!(record.get("startDate"), Some(&Value::Null));
}

#[test]
fn test_freesearch_requires_every_token() {
    let (_dir, crelish) = setup();
    save(&crelish, json!({"title": "Summer Party", "price": 10}));
    save(&crelish, json!({"title": "Summer Camp", "price": 3}));
    save(&crelish, json!({"title": "Winter Party", "price": 7}));

    assert_eq!(
        titles(&crelish, FilterSpec::new().search("summer PARTY")),
        vec!["Summer Party"]
    );
    assert_eq!(
        titles(&crelish, FilterSpec::new().search("party")),
        vec!["Summer Party", "Winter Party"]
    );
}

#[test]
fn test_freesearch_ignores_display_values() {
    let (_dir, crelish) = setup();
    save(&crelish, json!({"title": "Launch", "startDate": "2024-01-01"}));
    assert_eq!(titles(&crelish, FilterSpec::new().search("2024-01-01")), vec!["Launch"]);
    assert!(titles(&crelish, FilterSpec::new().search("01.01.2024")).is_empty());
}

#[test]
fn test_between_is_symmetric() {
    let (_dir, crelish) = setup();
    save(&crelish, json!({"title": "Cheap", "price": 1}));
    save(&crelish, json!({"title": "Mid", "price": 3}));
    save(&crelish, json!({"title": "Top", "price": 5}));
    save(&crelish, json!({"title": "Pricey", "price": 9}));

    let forward = titles(&crelish, FilterSpec::new().between("price", json!(1), json!(5)));
    let backward = titles(&crelish, FilterSpec::new().between("price", json!(5), json!(1)));
    assert_eq!(forward, vec!["Cheap", "Mid", "Top"]);
    assert_eq!(forward, backward);
}

#[test]
fn test_filter_settings_from_json() {
    let (_dir, crelish) = setup();
    save(&crelish, json!({"title": "Cheap", "price": 1}));
    save(&crelish, json!({"title": "Top", "price": 5}));
    let settings = QuerySettings::from_value(&json!({
        "filter": {"price": ["gt", 2]},
        "sort": "title desc"
    }))
    .unwrap();
    let page = crelish.data("event").unwrap().settings(settings).all().unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].get_str("title"), Some("Top"));
}

#[test]
fn test_backend_find_one_misses_are_none() {
    let (_dir, crelish) = setup();
    let schema = crelish.schema("event").unwrap();
    let backend = crelish.backend(&schema).unwrap();
    assert!(backend.find_one(&schema, "does-not-exist").unwrap().is_none());
    assert!(backend.find_one(&schema, "../escape").unwrap().is_none());
}
