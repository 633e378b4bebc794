use anyhow::{anyhow, bail, Result};
use serde_json::{Map, Value};

const OPERATORS: [&str; 5] = ["strict", "noempty", "lt", "gt", "between"];

/// Split `key=value`. The key may not be empty; the value may.
pub fn split_pair(arg: &str) -> Result<(&str, &str)> {
    let (key, value) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("missing key in '{}'", arg);
    }
    Ok((key, value))
}

/// Numbers, booleans and null are typed; everything else stays a string.
pub fn scalar(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(text.to_string()),
    }
}

/// Turn `--filter` arguments into the JSON filter object the library parses.
///
/// `title=party` is a plain match. `price=between:1:5` becomes
/// `["between", 1, 5]`; only a known operator name before the first `:`
/// makes a tuple, so `url=http://x` stays a plain match.
pub fn filter_map(conditions: &[String], search: Option<&str>) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for condition in conditions {
        let (key, value) = split_pair(condition)?;
        map.insert(key.to_string(), condition_value(value));
    }
    if let Some(text) = search.filter(|s| !s.trim().is_empty()) {
        map.insert(
            crelish::query::FREESEARCH.to_string(),
            Value::String(text.to_string()),
        );
    }
    Ok(map)
}

fn condition_value(value: &str) -> Value {
    let mut parts = value.split(':');
    let head = parts.next().unwrap_or_default();
    if !OPERATORS.contains(&head.to_ascii_lowercase().as_str()) {
        return scalar(value);
    }
    let mut tuple = vec![Value::String(head.to_string())];
    tuple.extend(parts.map(scalar));
    Value::Array(tuple)
}

/// Attributes for `save` from `key=value` arguments.
pub fn attribute_map(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, value) = split_pair(pair)?;
        map.insert(key.to_string(), scalar(value));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plain_conditions_are_scalars() {
        let map = filter_map(&args(&["title=Summer Party", "price=12", "url=http://x"]), None).unwrap();
        assert_eq!(map["title"], json!("Summer Party"));
        assert_eq!(map["price"], json!(12));
        assert_eq!(map["url"], json!("http://x"));
    }

    #[test]
    fn operator_conditions_become_tuples() {
        let map = filter_map(
            &args(&["price=between:1:5", "title=noempty", "slug=strict:a-b", "state=GT:1"]),
            None,
        )
        .unwrap();
        assert_eq!(map["price"], json!(["between", 1, 5]));
        assert_eq!(map["title"], json!(["noempty"]));
        assert_eq!(map["slug"], json!(["strict", "a-b"]));
        assert_eq!(map["state"], json!(["GT", 1]));
    }

    #[test]
    fn search_is_added_as_freesearch() {
        let map = filter_map(&[], Some("summer party")).unwrap();
        assert_eq!(map["freesearch"], json!("summer party"));
        assert!(filter_map(&[], Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn conditions_are_accepted_by_the_library() {
        let map = filter_map(&args(&["price=between:5:1"]), Some("party")).unwrap();
        let spec = crelish::FilterSpec::from_map(&map).unwrap();
        assert_eq!(spec.conditions.len(), 1);
        assert_eq!(spec.freesearch, vec!["party"]);
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        assert!(split_pair("title").is_err());
        assert!(split_pair("=value").is_err());
        assert_eq!(split_pair("title=").unwrap(), ("title", ""));
    }

    #[test]
    fn attributes_keep_text_and_type_numbers() {
        let map = attribute_map(&args(&["title=Launch", "startDate=2024-01-01", "price=9.5", "draft=true"]))
            .unwrap();
        assert_eq!(map["title"], json!("Launch"));
        assert_eq!(map["startDate"], json!("2024-01-01"));
        assert_eq!(map["price"], json!(9.5));
        assert_eq!(map["draft"], json!(true));
    }
}
