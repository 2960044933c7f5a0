//! Final FTS request assembly.
//!
//! Several resource types co-locate in one collection, so every query this
//! builder emits conjoins a mandatory term-match on `resourceType` with the
//! helper clauses — there is no way to build a request without it. The
//! builder produces the FTS request (the preferred ID-only execution path)
//! plus the two N1QL wrapper shapes: the ID-only projection and the COUNT
//! shape used for `_total=accurate`.

use reeffhir_gateway::{QueryNode, SearchRequest, SortSpec};

#[derive(Debug, Clone)]
pub struct FtsQueryBuilder {
    resource_type: String,
    clauses: Vec<QueryNode>,
    from: usize,
    size: usize,
    sort: Vec<SortSpec>,
}

impl FtsQueryBuilder {
    pub fn new(resource_type: impl Into<String>, size: usize) -> Self {
        Self {
            resource_type: resource_type.into(),
            clauses: Vec::new(),
            from: 0,
            size,
            sort: Vec::new(),
        }
    }

    pub fn push(&mut self, clause: QueryNode) -> &mut Self {
        self.clauses.push(clause);
        self
    }

    pub fn with_from(mut self, from: usize) -> Self {
        self.from = from;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortSpec>) -> Self {
        self.sort = sort;
        self
    }

    /// The complete FTS request. The `resourceType` term is always present.
    pub fn build_request(&self) -> SearchRequest {
        let mut nodes = Vec::with_capacity(self.clauses.len() + 1);
        nodes.push(QueryNode::term("resourceType", self.resource_type.clone()));
        nodes.extend(self.clauses.iter().cloned());
        SearchRequest {
            query: QueryNode::conjuncts(nodes),
            from: self.from,
            size: self.size,
            sort: self.sort.clone(),
        }
    }

    /// N1QL wrapper returning document keys only.
    pub fn id_statement(&self, bucket: &str, scope: &str, collection: &str, index: &str) -> String {
        format!(
            "SELECT META(res).id AS id FROM `{bucket}`.`{scope}`.`{collection}` AS res WHERE SEARCH(res, {}, {{\"index\": \"{index}\"}})",
            self.build_request().to_json()
        )
    }

    /// N1QL wrapper returning whole documents. Only worth it when a single
    /// round trip beats FTS-then-KV; the ID-only path is preferred.
    pub fn doc_statement(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
        index: &str,
    ) -> String {
        format!(
            "SELECT RAW res FROM `{bucket}`.`{scope}`.`{collection}` AS res WHERE SEARCH(res, {}, {{\"index\": \"{index}\"}})",
            self.build_request().to_json()
        )
    }

    /// N1QL count shape: the identical query with `size: 0`.
    pub fn count_statement(
        &self,
        bucket: &str,
        scope: &str,
        collection: &str,
        index: &str,
    ) -> String {
        format!(
            "SELECT COUNT(*) AS total FROM `{bucket}`.`{scope}`.`{collection}` AS res WHERE SEARCH(res, {}, {{\"index\": \"{index}\"}})",
            self.build_request().count_shape().to_json()
        )
    }
}
