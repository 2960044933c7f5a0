//! Recognition of the N1QL statement shapes the query builder emits.
//!
//! The production cluster executes these statements natively. This backend
//! supports exactly the shapes the server generates — the ID-only
//! projection, the COUNT shape, and the raw-document shape — by extracting
//! the embedded FTS request and delegating to the evaluator. Anything else
//! is a syntax error.

use reeffhir_gateway::SearchRequest;

/// What the statement projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// `SELECT META(res).id AS id`
    Ids,
    /// `SELECT COUNT(*) AS total`
    Count,
    /// `SELECT RAW res`
    Documents,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSearchStatement {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub index: String,
    pub request: SearchRequest,
    pub projection: Projection,
}

const FROM_MARKER: &str = "FROM `";
const FROM_END: &str = "` AS res";
const SEARCH_MARKER: &str = "SEARCH(res, ";
const INDEX_MARKER: &str = ", {\"index\": \"";
const TAIL: &str = "\"})";

pub fn parse_search_statement(statement: &str) -> Option<ParsedSearchStatement> {
    let statement = statement.trim();
    let projection = if statement.starts_with("SELECT COUNT(*)") {
        Projection::Count
    } else if statement.starts_with("SELECT META(res).id") {
        Projection::Ids
    } else if statement.starts_with("SELECT RAW res") {
        Projection::Documents
    } else {
        return None;
    };

    let from_start = statement.find(FROM_MARKER)? + FROM_MARKER.len();
    let from_end = statement[from_start..].find(FROM_END)? + from_start;
    let keyspace = &statement[from_start..from_end];
    let mut parts = keyspace.split("`.`");
    let bucket = parts.next()?.to_string();
    let scope = parts.next()?.to_string();
    let collection = parts.next()?.to_string();
    if parts.next().is_some() {
        return None;
    }

    let search_start = statement.find(SEARCH_MARKER)? + SEARCH_MARKER.len();
    let index_at = statement.rfind(INDEX_MARKER)?;
    if index_at <= search_start {
        return None;
    }
    let request_json: serde_json::Value =
        serde_json::from_str(&statement[search_start..index_at]).ok()?;
    let request = SearchRequest::from_json(&request_json)?;

    let index_start = index_at + INDEX_MARKER.len();
    let index_end = statement[index_start..].find(TAIL)? + index_start;
    let index = statement[index_start..index_end].to_string();

    Some(ParsedSearchStatement {
        bucket,
        scope,
        collection,
        index,
        request,
        projection,
    })
}
