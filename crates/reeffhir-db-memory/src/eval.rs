//! FTS query evaluation over JSON documents.
//!
//! The real cluster evaluates queries against its inverted index; this module
//! evaluates the same query tree directly against document bodies so that the
//! in-memory backend behaves observably like the indexed one. Field paths
//! mirror FHIR paths and flatten arrays at every step; a path ending in
//! `Exact` resolves to the base field but compares case-sensitively, the way
//! the keyword-analyzed `*Exact` index variants do.

use reeffhir_core::json::collect_values;
use reeffhir_core::time::parse_stored_datetime;
use reeffhir_gateway::QueryNode;
use serde_json::Value;
use time::OffsetDateTime;

/// Every value reachable from `doc` along a dotted path (arrays flattened at
/// each segment).
pub fn collect_field_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    collect_values(doc, path)
}

/// Strip a trailing `Exact` marker; returns the storage path and whether the
/// comparison must be case-sensitive.
fn resolve_field(path: &str) -> (String, bool) {
    match path.strip_suffix("Exact") {
        Some(base) if !base.is_empty() => (base.to_string(), true),
        _ => (path.to_string(), false),
    }
}

/// Does `doc` match the query tree?
pub fn matches(query: &QueryNode, doc: &Value) -> bool {
    match query {
        QueryNode::Term { field, term } => {
            let (path, _) = resolve_field(field);
            collect_field_values(doc, &path)
                .iter()
                .any(|v| scalar_as_string(v).is_some_and(|s| s == *term))
        }
        QueryNode::Match { field, value } => {
            let (path, case_sensitive) = resolve_field(field);
            collect_field_values(doc, &path).iter().any(|v| {
                scalar_as_string(v).is_some_and(|s| {
                    if case_sensitive {
                        s == *value
                    } else {
                        s.eq_ignore_ascii_case(value)
                    }
                })
            })
        }
        QueryNode::Prefix { field, prefix } => {
            let (path, _) = resolve_field(field);
            let needle = prefix.to_lowercase();
            collect_field_values(doc, &path)
                .iter()
                .any(|v| scalar_as_string(v).is_some_and(|s| s.to_lowercase().starts_with(&needle)))
        }
        QueryNode::BoolField { field, value } => collect_field_values(doc, field)
            .iter()
            .any(|v| v.as_bool() == Some(*value)),
        QueryNode::NumericRange {
            field,
            min,
            max,
            inclusive_min,
            inclusive_max,
        } => collect_field_values(doc, field).iter().any(|v| {
            let Some(n) = v.as_f64() else { return false };
            let lower_ok = match min {
                Some(min) if *inclusive_min => n >= *min,
                Some(min) => n > *min,
                None => true,
            };
            let upper_ok = match max {
                Some(max) if *inclusive_max => n <= *max,
                Some(max) => n < *max,
                None => true,
            };
            lower_ok && upper_ok
        }),
        QueryNode::DateRange {
            field,
            start,
            end,
            inclusive_start,
            inclusive_end,
        } => {
            let start = start.as_deref().and_then(parse_stored_datetime);
            let end = end.as_deref().and_then(parse_stored_datetime);
            collect_field_values(doc, field).iter().any(|v| {
                let Some(instant) = v.as_str().and_then(parse_stored_datetime) else {
                    return false;
                };
                date_in_range(instant, start, end, *inclusive_start, *inclusive_end)
            })
        }
        QueryNode::Wildcard { field, wildcard } => {
            let (path, _) = resolve_field(field);
            collect_field_values(doc, &path)
                .iter()
                .any(|v| scalar_as_string(v).is_some_and(|s| glob_match(wildcard, &s)))
        }
        QueryNode::Conjunction(nodes) => nodes.iter().all(|n| matches(n, doc)),
        QueryNode::Disjunction(nodes) => nodes.iter().any(|n| matches(n, doc)),
        QueryNode::Boolean { must, must_not } => {
            must.iter().all(|n| matches(n, doc)) && !must_not.iter().any(|n| matches(n, doc))
        }
        QueryNode::MatchAll => true,
    }
}

fn date_in_range(
    instant: OffsetDateTime,
    start: Option<OffsetDateTime>,
    end: Option<OffsetDateTime>,
    inclusive_start: bool,
    inclusive_end: bool,
) -> bool {
    let lower_ok = match start {
        Some(s) if inclusive_start => instant >= s,
        Some(s) => instant > s,
        None => true,
    };
    let upper_ok = match end {
        Some(e) if inclusive_end => instant <= e,
        Some(e) => instant < e,
        None => true,
    };
    lower_ok && upper_ok
}

fn scalar_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Minimal glob: `*` matches any run, `?` exactly one character.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_inner(&p, &t)
}

fn glob_inner(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            (0..=t.len()).any(|i| glob_inner(&p[1..], &t[i..]))
        }
        Some('?') => !t.is_empty() && glob_inner(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && glob_inner(&p[1..], &t[1..]),
    }
}

/// Extract a sort key for one document and field (first reachable value).
pub fn sort_key(doc: &Value, field: &str) -> Option<String> {
    let (path, _) = resolve_field(field);
    collect_field_values(doc, &path)
        .first()
        .and_then(|v| scalar_as_string(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient() -> Value {
        json!({
            "resourceType": "Patient",
            "id": "p1",
            "active": true,
            "birthDate": "1987-06-05",
            "name": [
                {"family": "Smith", "given": ["John", "Q"]},
                {"family": "Smythe", "given": ["Jack"]}
            ],
            "identifier": [{"system": "http://sys", "value": "MRN-1"}],
            "meta": {"versionId": "1", "lastUpdated": "2025-01-01T10:00:00Z"}
        })
    }

    #[test]
    fn collects_through_arrays() {
        let doc = patient();
        let values = collect_field_values(&doc, "name.family");
        assert_eq!(values.len(), 2);
        let values = collect_field_values(&doc, "name.given");
        assert_eq!(values.len(), 3);
        assert!(collect_field_values(&doc, "address.city").is_empty());
    }

    #[test]
    fn term_is_exact() {
        let doc = patient();
        assert!(matches(&QueryNode::term("resourceType", "Patient"), &doc));
        assert!(!matches(&QueryNode::term("resourceType", "patient"), &doc));
        assert!(matches(&QueryNode::term("identifier.value", "MRN-1"), &doc));
    }

    #[test]
    fn prefix_is_case_insensitive() {
        let doc = patient();
        assert!(matches(&QueryNode::prefix("name.family", "smi"), &doc));
        assert!(matches(&QueryNode::prefix("name.family", "SMY"), &doc));
        assert!(!matches(&QueryNode::prefix("name.family", "jones"), &doc));
    }

    #[test]
    fn exact_variant_is_case_sensitive() {
        let doc = patient();
        assert!(matches(
            &QueryNode::match_value("name.familyExact", "Smith"),
            &doc
        ));
        assert!(!matches(
            &QueryNode::match_value("name.familyExact", "smith"),
            &doc
        ));
    }

    #[test]
    fn bool_field() {
        let doc = patient();
        assert!(matches(&QueryNode::bool_field("active", true), &doc));
        assert!(!matches(&QueryNode::bool_field("active", false), &doc));
    }

    #[test]
    fn date_range_day_granularity() {
        let doc = patient();
        let node = QueryNode::DateRange {
            field: "birthDate".into(),
            start: Some("1987-01-01T00:00:00Z".into()),
            end: Some("1987-12-31T23:59:59Z".into()),
            inclusive_start: true,
            inclusive_end: true,
        };
        assert!(matches(&node, &doc));

        let node = QueryNode::DateRange {
            field: "birthDate".into(),
            start: Some("1990-01-01T00:00:00Z".into()),
            end: None,
            inclusive_start: true,
            inclusive_end: true,
        };
        assert!(!matches(&node, &doc));
    }

    #[test]
    fn exists_wildcard() {
        let doc = patient();
        assert!(matches(&QueryNode::exists("name.family"), &doc));
        assert!(!matches(&QueryNode::exists("deceasedBoolean"), &doc));
    }

    #[test]
    fn boolean_negation() {
        let doc = patient();
        let node = QueryNode::negate(QueryNode::term("name.family", "Smith"));
        assert!(!matches(&node, &doc));
        let node = QueryNode::negate(QueryNode::term("name.family", "Jones"));
        assert!(matches(&node, &doc));
    }

    #[test]
    fn conjunction_and_disjunction() {
        let doc = patient();
        let both = QueryNode::conjuncts(vec![
            QueryNode::term("resourceType", "Patient"),
            QueryNode::prefix("name.given", "jo"),
        ]);
        assert!(matches(&both, &doc));

        let either = QueryNode::disjuncts(vec![
            QueryNode::term("resourceType", "Observation"),
            QueryNode::term("id", "p1"),
        ]);
        assert!(matches(&either, &doc));
    }

    #[test]
    fn glob_basics() {
        assert!(glob_match("?*", "x"));
        assert!(!glob_match("?*", ""));
        assert!(glob_match("MRN-*", "MRN-123"));
        assert!(!glob_match("MRN-?", "MRN-12"));
    }

    #[test]
    fn sort_key_extraction() {
        let doc = patient();
        assert_eq!(sort_key(&doc, "meta.lastUpdated").unwrap(), "2025-01-01T10:00:00Z");
        assert_eq!(sort_key(&doc, "name.family").unwrap(), "Smith");
        assert!(sort_key(&doc, "address.city").is_none());
    }
}
