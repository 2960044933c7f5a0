//! Dotted-path traversal over FHIR JSON documents.

use serde_json::Value;

/// Collect every value reachable from `doc` along a dotted path, flattening
/// arrays at each segment (FHIR elements repeat freely).
pub fn collect_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(v) = map.get(segment) {
                        flatten_into(v, &mut next);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = item.get(segment) {
                            flatten_into(v, &mut next);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

/// String values reachable along a dotted path.
pub fn collect_strings(doc: &Value, path: &str) -> Vec<String> {
    collect_values(doc, path)
        .into_iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

fn flatten_into<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        other => out.push(other),
    }
}
