//! Full-text-search request model.
//!
//! A search is described as a tree of [`QueryNode`]s plus paging, sort, and
//! field options. [`QueryNode::to_json`] renders the tree in the FTS engine's
//! JSON DSL; the in-memory backend evaluates the tree directly.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One clause of an FTS query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Non-analyzed exact term match.
    Term { field: String, term: String },
    /// Analyzed match (case-insensitive token equality).
    Match { field: String, value: String },
    /// Case-insensitive prefix match.
    Prefix { field: String, prefix: String },
    /// Boolean-field clause.
    BoolField { field: String, value: bool },
    /// Numeric range; `None` bounds are unbounded.
    NumericRange {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
        inclusive_min: bool,
        inclusive_max: bool,
    },
    /// Date range over RFC 3339 values; `None` bounds are unbounded.
    DateRange {
        field: String,
        start: Option<String>,
        end: Option<String>,
        inclusive_start: bool,
        inclusive_end: bool,
    },
    /// Glob match; `?*` against a field means "field present and non-empty".
    Wildcard { field: String, wildcard: String },
    /// All clauses must match.
    Conjunction(Vec<QueryNode>),
    /// At least one clause must match.
    Disjunction(Vec<QueryNode>),
    /// Boolean query: every `must` matches and no `must_not` matches.
    Boolean {
        must: Vec<QueryNode>,
        must_not: Vec<QueryNode>,
    },
    /// Matches every document in the index.
    MatchAll,
}

impl QueryNode {
    pub fn term(field: impl Into<String>, term: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            term: term.into(),
        }
    }

    pub fn match_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bool_field(field: impl Into<String>, value: bool) -> Self {
        Self::BoolField {
            field: field.into(),
            value,
        }
    }

    /// `field` carries at least one non-empty value.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Wildcard {
            field: field.into(),
            wildcard: "?*".to_string(),
        }
    }

    pub fn conjuncts(nodes: Vec<QueryNode>) -> Self {
        Self::Conjunction(nodes)
    }

    /// Disjunction, collapsing the single-clause case.
    pub fn disjuncts(mut nodes: Vec<QueryNode>) -> Self {
        if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Self::Disjunction(nodes)
        }
    }

    pub fn negate(node: QueryNode) -> Self {
        Self::Boolean {
            must: vec![Self::MatchAll],
            must_not: vec![node],
        }
    }

    /// Render in the FTS engine's JSON DSL.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Term { field, term } => json!({"term": term, "field": field}),
            Self::Match { field, value } => json!({"match": value, "field": field}),
            Self::Prefix { field, prefix } => json!({"prefix": prefix, "field": field}),
            Self::BoolField { field, value } => json!({"bool": value, "field": field}),
            Self::NumericRange {
                field,
                min,
                max,
                inclusive_min,
                inclusive_max,
            } => {
                let mut obj = json!({"field": field});
                let map = obj.as_object_mut().unwrap();
                if let Some(min) = min {
                    map.insert("min".into(), json!(min));
                    map.insert("inclusive_min".into(), json!(inclusive_min));
                }
                if let Some(max) = max {
                    map.insert("max".into(), json!(max));
                    map.insert("inclusive_max".into(), json!(inclusive_max));
                }
                obj
            }
            Self::DateRange {
                field,
                start,
                end,
                inclusive_start,
                inclusive_end,
            } => {
                let mut obj = json!({"field": field});
                let map = obj.as_object_mut().unwrap();
                if let Some(start) = start {
                    map.insert("start".into(), json!(start));
                    map.insert("inclusive_start".into(), json!(inclusive_start));
                }
                if let Some(end) = end {
                    map.insert("end".into(), json!(end));
                    map.insert("inclusive_end".into(), json!(inclusive_end));
                }
                obj
            }
            Self::Wildcard { field, wildcard } => {
                json!({"wildcard": wildcard, "field": field})
            }
            Self::Conjunction(nodes) => {
                json!({"conjuncts": nodes.iter().map(Self::to_json).collect::<Vec<_>>()})
            }
            Self::Disjunction(nodes) => {
                json!({"disjuncts": nodes.iter().map(Self::to_json).collect::<Vec<_>>()})
            }
            Self::Boolean { must, must_not } => {
                let mut obj = serde_json::Map::new();
                if !must.is_empty() {
                    obj.insert(
                        "must".into(),
                        json!({"conjuncts": must.iter().map(Self::to_json).collect::<Vec<_>>()}),
                    );
                }
                if !must_not.is_empty() {
                    obj.insert(
                        "must_not".into(),
                        json!({"disjuncts": must_not.iter().map(Self::to_json).collect::<Vec<_>>()}),
                    );
                }
                Value::Object(obj)
            }
            Self::MatchAll => json!({"match_all": {}}),
        }
    }

    /// Parse a query node from the FTS JSON DSL. Inverse of [`Self::to_json`].
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = || obj.get("field").and_then(Value::as_str).map(String::from);

        if let Some(term) = obj.get("term").and_then(Value::as_str) {
            return Some(Self::Term {
                field: field()?,
                term: term.to_string(),
            });
        }
        if let Some(m) = obj.get("match").and_then(Value::as_str) {
            return Some(Self::Match {
                field: field()?,
                value: m.to_string(),
            });
        }
        if let Some(p) = obj.get("prefix").and_then(Value::as_str) {
            return Some(Self::Prefix {
                field: field()?,
                prefix: p.to_string(),
            });
        }
        if let Some(b) = obj.get("bool").and_then(Value::as_bool) {
            return Some(Self::BoolField {
                field: field()?,
                value: b,
            });
        }
        if let Some(w) = obj.get("wildcard").and_then(Value::as_str) {
            return Some(Self::Wildcard {
                field: field()?,
                wildcard: w.to_string(),
            });
        }
        if obj.contains_key("min") || obj.contains_key("max") {
            return Some(Self::NumericRange {
                field: field()?,
                min: obj.get("min").and_then(Value::as_f64),
                max: obj.get("max").and_then(Value::as_f64),
                inclusive_min: obj
                    .get("inclusive_min")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                inclusive_max: obj
                    .get("inclusive_max")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            });
        }
        if obj.contains_key("start") || obj.contains_key("end") {
            return Some(Self::DateRange {
                field: field()?,
                start: obj.get("start").and_then(Value::as_str).map(String::from),
                end: obj.get("end").and_then(Value::as_str).map(String::from),
                inclusive_start: obj
                    .get("inclusive_start")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                inclusive_end: obj
                    .get("inclusive_end")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            });
        }
        if let Some(items) = obj.get("conjuncts").and_then(Value::as_array) {
            let nodes: Option<Vec<_>> = items.iter().map(Self::from_json).collect();
            return Some(Self::Conjunction(nodes?));
        }
        if let Some(items) = obj.get("disjuncts").and_then(Value::as_array) {
            let nodes: Option<Vec<_>> = items.iter().map(Self::from_json).collect();
            return Some(Self::Disjunction(nodes?));
        }
        if obj.contains_key("must") || obj.contains_key("must_not") {
            let must = match obj.get("must").and_then(|m| m.get("conjuncts")) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Option<Vec<_>>>()?,
                _ => Vec::new(),
            };
            let must_not = match obj.get("must_not").and_then(|m| m.get("disjuncts")) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Option<Vec<_>>>()?,
                _ => Vec::new(),
            };
            return Some(Self::Boolean { must, must_not });
        }
        if obj.contains_key("match_all") {
            return Some(Self::MatchAll);
        }
        None
    }
}

/// Sort key for FTS results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// FTS sort-array entry (`-field` for descending).
    pub fn to_sort_string(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// A complete FTS request: query tree plus options.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: QueryNode,
    pub from: usize,
    pub size: usize,
    pub sort: Vec<SortSpec>,
}

impl SearchRequest {
    pub fn new(query: QueryNode, size: usize) -> Self {
        Self {
            query,
            from: 0,
            size,
            sort: Vec::new(),
        }
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    /// Count-only variant of this request.
    pub fn count_shape(&self) -> Self {
        Self {
            query: self.query.clone(),
            from: 0,
            size: 0,
            sort: Vec::new(),
        }
    }

    /// Full request body in the FTS engine's JSON DSL.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "query": self.query.to_json(),
            "from": self.from,
            "size": self.size,
        });
        if !self.sort.is_empty() {
            obj.as_object_mut().unwrap().insert(
                "sort".into(),
                json!(self.sort.iter().map(SortSpec::to_sort_string).collect::<Vec<_>>()),
            );
        }
        obj
    }

    /// Parse a request from its JSON DSL form. Inverse of [`Self::to_json`].
    pub fn from_json(value: &Value) -> Option<Self> {
        let query = QueryNode::from_json(value.get("query")?)?;
        let from = value.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = value.get("size").and_then(Value::as_u64).unwrap_or(0) as usize;
        let sort = match value.get("sort").and_then(Value::as_array) {
            Some(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| match s.strip_prefix('-') {
                    Some(field) => SortSpec::desc(field),
                    None => SortSpec::asc(s),
                })
                .collect(),
            None => Vec::new(),
        };
        Some(Self {
            query,
            from,
            size,
            sort,
        })
    }
}

/// Result of an FTS request: hit keys in index order plus the total count of
/// matches (independent of paging).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHits {
    pub keys: Vec<String>,
    pub total: u64,
}

impl SearchHits {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_json_shape() {
        let node = QueryNode::term("resourceType", "Patient");
        assert_eq!(
            node.to_json(),
            json!({"term": "Patient", "field": "resourceType"})
        );
    }

    #[test]
    fn disjuncts_collapses_singleton() {
        let node = QueryNode::disjuncts(vec![QueryNode::term("a", "x")]);
        assert!(matches!(node, QueryNode::Term { .. }));

        let node = QueryNode::disjuncts(vec![
            QueryNode::term("a", "x"),
            QueryNode::term("b", "y"),
        ]);
        assert!(matches!(node, QueryNode::Disjunction(_)));
    }

    #[test]
    fn numeric_range_omits_unbounded_sides() {
        let node = QueryNode::NumericRange {
            field: "valueQuantity.value".into(),
            min: Some(5.0),
            max: None,
            inclusive_min: true,
            inclusive_max: false,
        };
        let v = node.to_json();
        assert_eq!(v["min"], 5.0);
        assert_eq!(v["inclusive_min"], true);
        assert!(v.get("max").is_none());
    }

    #[test]
    fn boolean_negation_shape() {
        let node = QueryNode::negate(QueryNode::term("status", "final"));
        let v = node.to_json();
        assert!(v.get("must").is_some());
        assert!(v.get("must_not").is_some());
    }

    #[test]
    fn request_json_carries_sort() {
        let req = SearchRequest::new(QueryNode::MatchAll, 50)
            .with_from(10)
            .with_sort(vec![SortSpec::desc("meta.lastUpdated")]);
        let v = req.to_json();
        assert_eq!(v["from"], 10);
        assert_eq!(v["size"], 50);
        assert_eq!(v["sort"][0], "-meta.lastUpdated");
    }

    #[test]
    fn dsl_round_trips_through_json() {
        let node = QueryNode::conjuncts(vec![
            QueryNode::term("resourceType", "Patient"),
            QueryNode::disjuncts(vec![
                QueryNode::prefix("name.family", "smi"),
                QueryNode::match_value("name.familyExact", "Smith"),
            ]),
            QueryNode::negate(QueryNode::bool_field("active", false)),
            QueryNode::DateRange {
                field: "birthDate".into(),
                start: Some("1990-01-01T00:00:00Z".into()),
                end: None,
                inclusive_start: true,
                inclusive_end: true,
            },
        ]);
        let req = SearchRequest::new(node, 25).with_sort(vec![SortSpec::asc("id")]);
        let parsed = SearchRequest::from_json(&req.to_json()).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn count_shape_zeroes_paging() {
        let req = SearchRequest::new(QueryNode::MatchAll, 50).with_from(20);
        let count = req.count_shape();
        assert_eq!(count.size, 0);
        assert_eq!(count.from, 0);
        assert_eq!(count.query, req.query);
    }
}
