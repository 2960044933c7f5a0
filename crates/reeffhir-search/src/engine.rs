//! Search orchestration: parameter classification, FTS execution, includes,
//! chained search, `$everything`, materialization, and pagination.
//!
//! A fresh search runs one ID-only FTS (capped by `fts_limit`), resolves
//! include directives against the primary key list, stores the combined key
//! list off-heap when it spans more than one page, and returns a searchset
//! Bundle. A continuation request (`_page`) only slices the stored key list
//! and batch-reads the page; it never re-runs the FTS and never mutates the
//! stored state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Value, json};

use reeffhir_core::json::collect_strings;
use reeffhir_core::router::{CollectionRouter, SCOPE_RESOURCES};
use reeffhir_core::{CoreError, Result, now_utc, parse_resource_key};
use reeffhir_gateway::{DbGateway, QueryNode, SortSpec};

use crate::builder::FtsQueryBuilder;
use crate::fhirpath::ParsedExpression;
use crate::include::{IncludeParam, parse_include};
use crate::paging::{PageState, PaginationCache, SearchKind, new_token};
use crate::parameters::{SearchModifier, SearchParamDef, SearchParamType};
use crate::parser::{ParsedParameters, SummaryMode, TotalMode, parse_query};
use crate::registry::SearchSchema;
use crate::types;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Safety cap on keys returned by one FTS (`search.fts_limit`).
    pub fts_limit: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fts_limit: 1_000,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

pub struct SearchEngine {
    gateway: Arc<DbGateway>,
    router: Arc<CollectionRouter>,
    schema: Arc<SearchSchema>,
    cache: PaginationCache,
    config: SearchConfig,
    /// Per-tenant resource types scanned by `$everything`. A tenant without
    /// configuration gets the empty set.
    everything_types: BTreeMap<String, Vec<String>>,
}

impl SearchEngine {
    pub fn new(
        gateway: Arc<DbGateway>,
        router: Arc<CollectionRouter>,
        schema: Arc<SearchSchema>,
        config: SearchConfig,
    ) -> Self {
        Self {
            cache: PaginationCache::new(Arc::clone(&gateway)),
            gateway,
            router,
            schema,
            config,
            everything_types: BTreeMap::new(),
        }
    }

    pub fn with_everything_types(
        mut self,
        types: BTreeMap<String, Vec<String>>,
    ) -> Self {
        self.everything_types = types;
        self
    }

    /// Type-level search: `GET /fhir/{tenant}/{Type}?...`.
    pub async fn search(
        &self,
        tenant: &str,
        resource_type: &str,
        query: &str,
        base_url: &str,
    ) -> Result<Value> {
        let params = parse_query(query);
        let count = params.count(self.config.default_page_size, self.config.max_page_size)?;
        let offset = params.offset()?;
        let summary = params.summary()?;

        if let Some(token) = params.page() {
            return self
                .continuation(tenant, resource_type, token, offset, count, summary)
                .await;
        }

        let collection = self.router.target_collection(resource_type)?.to_string();
        let index = self.router.fts_index(resource_type)?;
        let total_mode = params.total()?;
        let sort = self.resolve_sort(resource_type, &params)?;

        let (clauses, chained) = self.build_filter_clauses(tenant, resource_type, &params).await?;
        let Some(clauses) = clauses else {
            // A chain pre-search matched nothing: the result is empty.
            return Ok(self.make_bundle(
                base_url,
                tenant,
                resource_type,
                query,
                Vec::new(),
                Some(0),
                None,
                None,
            ));
        };

        let mut builder = FtsQueryBuilder::new(resource_type, self.config.fts_limit);
        for clause in &clauses {
            builder.push(clause.clone());
        }
        let builder = builder.with_sort(sort);
        let request = builder.build_request();
        let hits = self.gateway.search_query(tenant, &index, &request).await?;
        let primary_keys = hits.keys;
        let primary_count = primary_keys.len();

        let includes = self.parse_includes(&params)?;
        let mut combined = primary_keys.clone();
        let mut seen: BTreeSet<String> = combined.iter().cloned().collect();

        let has_includes = !includes.is_empty();
        for inc in &includes {
            let extra = if inc.reverse {
                self.revinclude_keys(tenant, inc, &primary_keys).await?
            } else {
                self.include_keys(tenant, resource_type, inc, &primary_keys)
                    .await?
            };
            for key in extra {
                if seen.insert(key.clone()) {
                    combined.push(key);
                }
            }
        }

        let total = match total_mode {
            TotalMode::Accurate => {
                let statement =
                    builder.count_statement(tenant, SCOPE_RESOURCES, &collection, &index);
                let rows = self.gateway.query(tenant, &statement).await?;
                rows.first()
                    .and_then(|r| r.get("total"))
                    .and_then(Value::as_u64)
            }
            TotalMode::Estimate => Some(hits.total),
            TotalMode::None => None,
        };

        let kind = if chained {
            SearchKind::Chain
        } else if includes.iter().any(|i| i.reverse) {
            SearchKind::Revinclude
        } else if has_includes {
            SearchKind::Include
        } else {
            SearchKind::Regular
        };

        self.paginate_and_bundle(
            tenant,
            resource_type,
            kind,
            combined,
            primary_count,
            offset,
            count,
            summary,
            total,
            base_url,
            query,
        )
        .await
    }

    /// `GET /fhir/{tenant}/Patient/{id}/$everything`.
    ///
    /// Unions the patient's own key with a revinclude-style scan over the
    /// tenant's configured related types. Absent configuration means an
    /// empty set, not "all types".
    pub async fn everything(
        &self,
        tenant: &str,
        patient_id: &str,
        query: &str,
        base_url: &str,
    ) -> Result<Value> {
        let params = parse_query(query);
        let count = params.count(self.config.default_page_size, self.config.max_page_size)?;
        let offset = params.offset()?;
        let summary = params.summary()?;

        if let Some(token) = params.page() {
            return self
                .continuation(tenant, "Patient", token, offset, count, summary)
                .await;
        }

        let patient_key = format!("Patient/{patient_id}");
        let patients = self
            .gateway
            .collection(tenant, SCOPE_RESOURCES, self.router.target_collection("Patient")?)?
            .get(&patient_key)
            .await?;
        if patients.is_none() {
            return Err(CoreError::not_found("Patient", patient_id));
        }

        let mut combined = vec![patient_key.clone()];
        let mut seen: BTreeSet<String> = combined.iter().cloned().collect();
        let related = self
            .everything_types
            .get(tenant)
            .cloned()
            .unwrap_or_default();

        for related_type in &related {
            let index = self.router.fts_index(related_type)?;
            let ref_params = self
                .schema
                .reference_params_targeting(related_type, "Patient");
            let mut ref_fields = BTreeSet::new();
            for def in ref_params {
                let expr = ParsedExpression::parse(related_type, def.expression)?;
                for alt in expr.alternatives() {
                    if let Some(path) = alt.resolved_path() {
                        ref_fields.insert(format!("{path}.reference"));
                    }
                }
            }
            if ref_fields.is_empty() {
                continue;
            }
            let clause = QueryNode::disjuncts(
                ref_fields
                    .into_iter()
                    .map(|field| QueryNode::term(field, patient_key.clone()))
                    .collect(),
            );
            let mut builder = FtsQueryBuilder::new(related_type.as_str(), self.config.fts_limit);
            builder.push(clause);
            let hits = self
                .gateway
                .search_query(tenant, &index, &builder.build_request())
                .await?;
            for key in hits.keys {
                if seen.insert(key.clone()) {
                    combined.push(key);
                }
            }
        }

        let total = combined.len() as u64;
        let primary_count = combined.len();
        self.paginate_and_bundle(
            tenant,
            "Patient",
            SearchKind::Everything,
            combined,
            primary_count,
            offset,
            count,
            summary,
            Some(total),
            base_url,
            query,
        )
        .await
    }

    // ---- fresh-search internals ------------------------------------------

    /// Build the conjunction of all filter clauses. Returns `Ok((None, _))`
    /// when a chain pre-search proves the result empty.
    async fn build_filter_clauses(
        &self,
        tenant: &str,
        resource_type: &str,
        params: &ParsedParameters,
    ) -> Result<(Option<Vec<QueryNode>>, bool)> {
        let mut clauses = Vec::new();
        let mut chained = false;
        // Repeats of one date parameter fold into a single bounded range.
        let mut date_groups: BTreeMap<(String, Option<String>), Vec<String>> = BTreeMap::new();

        for param in params.filters() {
            if param.name.contains('.') {
                chained = true;
                match self.chain_clause(tenant, resource_type, param).await? {
                    Some(clause) => clauses.push(clause),
                    None => return Ok((None, true)),
                }
                continue;
            }

            let def = self
                .schema
                .param(resource_type, &param.name)
                .ok_or_else(|| {
                    CoreError::invalid_request(format!(
                        "unknown search parameter '{}' on {resource_type}",
                        param.name
                    ))
                })?;

            if def.param_type == SearchParamType::Date && param.modifier.is_none() {
                date_groups
                    .entry((param.name.clone(), None))
                    .or_default()
                    .extend(param.values.iter().cloned());
                continue;
            }

            let modifier = param
                .modifier
                .as_deref()
                .map(SearchModifier::parse)
                .transpose()?;
            clauses.push(self.dispatch(resource_type, def, modifier.as_ref(), &param.values)?);
        }

        for ((name, _), values) in date_groups {
            let def = self
                .schema
                .param(resource_type, &name)
                .expect("grouped parameter exists");
            clauses.push(self.dispatch(resource_type, def, None, &values)?);
        }

        Ok((Some(clauses), chained))
    }

    fn dispatch(
        &self,
        resource_type: &str,
        def: &SearchParamDef,
        modifier: Option<&SearchModifier>,
        values: &[String],
    ) -> Result<QueryNode> {
        let expr = ParsedExpression::parse(resource_type, def.expression)?;
        match def.param_type {
            SearchParamType::Token => {
                types::token::build_clause(&self.schema, resource_type, def, &expr, modifier, values)
            }
            SearchParamType::String => {
                types::string::build_clause(&self.schema, resource_type, def, &expr, modifier, values)
            }
            SearchParamType::Date => {
                types::date::build_clause(&self.schema, resource_type, def, &expr, modifier, values)
            }
            SearchParamType::Reference => types::reference::build_clause(
                &self.schema,
                resource_type,
                def,
                &expr,
                modifier,
                values,
            ),
            SearchParamType::Quantity => types::quantity::build_clause(
                &self.schema,
                resource_type,
                def,
                &expr,
                modifier,
                values,
            ),
        }
    }

    /// `A.b.c=v`: search the chain target first, then constrain the primary
    /// query to references onto the matched keys. `None` when nothing
    /// matched (the whole search is empty).
    async fn chain_clause(
        &self,
        tenant: &str,
        resource_type: &str,
        param: &crate::parser::ParsedParam,
    ) -> Result<Option<QueryNode>> {
        let (ref_name, sub_name) = param
            .name
            .split_once('.')
            .expect("chained parameter contains a dot");

        let ref_def = self
            .schema
            .param(resource_type, ref_name)
            .ok_or_else(|| {
                CoreError::invalid_request(format!(
                    "unknown search parameter '{ref_name}' on {resource_type}"
                ))
            })?;
        if ref_def.param_type != SearchParamType::Reference {
            return Err(CoreError::invalid_request(format!(
                "'{ref_name}' on {resource_type} is not a reference parameter and cannot be chained"
            )));
        }

        // The chain target must be unambiguous: exactly one declared target
        // carries the chained parameter.
        let candidates: Vec<&str> = ref_def
            .targets
            .iter()
            .copied()
            .filter(|t| self.schema.param(t, sub_name).is_some())
            .collect();
        let target = match candidates.as_slice() {
            [single] => *single,
            [] => {
                return Err(CoreError::invalid_request(format!(
                    "no target of '{ref_name}' declares parameter '{sub_name}'"
                )));
            }
            _ => {
                return Err(CoreError::invalid_request(format!(
                    "chained parameter '{}' is ambiguous across target types",
                    param.name
                )));
            }
        };

        let sub_def = self.schema.param(target, sub_name).expect("checked above");
        let modifier = param
            .modifier
            .as_deref()
            .map(SearchModifier::parse)
            .transpose()?;
        let sub_clause = self.dispatch(target, sub_def, modifier.as_ref(), &param.values)?;

        let mut builder = FtsQueryBuilder::new(target, self.config.fts_limit);
        builder.push(sub_clause);
        let index = self.router.fts_index(target)?;
        let hits = self
            .gateway
            .search_query(tenant, &index, &builder.build_request())
            .await?;
        if hits.keys.is_empty() {
            return Ok(None);
        }

        let ref_expr = ParsedExpression::parse(resource_type, ref_def.expression)?;
        let mut ref_fields = Vec::new();
        for alt in ref_expr.alternatives() {
            if let Some(path) = alt.resolved_path() {
                ref_fields.push(format!("{path}.reference"));
            }
        }
        let clause = QueryNode::disjuncts(
            ref_fields
                .iter()
                .flat_map(|field| {
                    hits.keys
                        .iter()
                        .map(move |key| QueryNode::term(field.clone(), key.clone()))
                })
                .collect(),
        );
        Ok(Some(clause))
    }

    fn parse_includes(&self, params: &ParsedParameters) -> Result<Vec<IncludeParam>> {
        let mut includes = Vec::new();
        for (value, iterate) in params.includes(false) {
            includes.push(parse_include(value, iterate, false, &self.schema)?);
        }
        for (value, iterate) in params.includes(true) {
            includes.push(parse_include(value, iterate, true, &self.schema)?);
        }
        Ok(includes)
    }

    /// Forward include: follow reference fields out of the primary documents.
    async fn include_keys(
        &self,
        tenant: &str,
        resource_type: &str,
        include: &IncludeParam,
        primary_keys: &[String],
    ) -> Result<Vec<String>> {
        if include.source_type != resource_type {
            return Err(CoreError::invalid_request(format!(
                "_include source '{}' does not match searched type {resource_type}",
                include.source_type
            )));
        }
        if primary_keys.is_empty() {
            return Ok(Vec::new());
        }

        let def = self
            .schema
            .param(&include.source_type, &include.search_param)
            .expect("validated by parse_include");
        let expr = ParsedExpression::parse(&include.source_type, def.expression)?;
        let paths: Vec<String> = expr
            .alternatives()
            .into_iter()
            .filter_map(|alt| alt.resolved_path())
            .map(|p| format!("{p}.reference"))
            .collect();

        let docs = self.fetch_documents(tenant, primary_keys).await?;
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for (_, doc) in &docs {
            for path in &paths {
                for reference in collect_strings(doc, path) {
                    if let Some(target) = &include.target_type {
                        if !reference.starts_with(&format!("{target}/")) {
                            continue;
                        }
                    }
                    if parse_resource_key(&reference).is_ok() && seen.insert(reference.clone()) {
                        out.push(reference);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Reverse include: FTS the referencing type for pointers at the primary
    /// keys.
    async fn revinclude_keys(
        &self,
        tenant: &str,
        include: &IncludeParam,
        primary_keys: &[String],
    ) -> Result<Vec<String>> {
        if primary_keys.is_empty() {
            return Ok(Vec::new());
        }
        let def = self
            .schema
            .param(&include.source_type, &include.search_param)
            .expect("validated by parse_include");
        let expr = ParsedExpression::parse(&include.source_type, def.expression)?;
        let fields: Vec<String> = expr
            .alternatives()
            .into_iter()
            .filter_map(|alt| alt.resolved_path())
            .map(|p| format!("{p}.reference"))
            .collect();

        let clause = QueryNode::disjuncts(
            fields
                .iter()
                .flat_map(|field| {
                    primary_keys
                        .iter()
                        .map(move |key| QueryNode::term(field.clone(), key.clone()))
                })
                .collect(),
        );
        let mut builder = FtsQueryBuilder::new(include.source_type.as_str(), self.config.fts_limit);
        builder.push(clause);
        let index = self.router.fts_index(&include.source_type)?;
        let hits = self
            .gateway
            .search_query(tenant, &index, &builder.build_request())
            .await?;
        Ok(hits.keys)
    }

    // ---- pagination and materialization ----------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn paginate_and_bundle(
        &self,
        tenant: &str,
        resource_type: &str,
        kind: SearchKind,
        combined: Vec<String>,
        primary_count: usize,
        offset: usize,
        count: usize,
        summary: Option<SummaryMode>,
        total: Option<u64>,
        base_url: &str,
        self_query: &str,
    ) -> Result<Value> {
        let page_keys: Vec<String> = combined
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect();
        let docs = self.fetch_documents(tenant, &page_keys).await?;

        let mut next = None;
        if offset + count < combined.len() {
            let token = new_token();
            let state = PageState {
                search_type: kind,
                resource_type: resource_type.to_string(),
                all_document_keys: combined.clone(),
                page_size: count,
                bucket_name: tenant.to_string(),
                base_url: base_url.to_string(),
                primary_resource_count: primary_count,
                created_at: now_utc(),
            };
            match self.cache.store(tenant, &token, &state).await {
                Ok(()) => {
                    next = Some(page_link(
                        base_url,
                        tenant,
                        resource_type,
                        &token,
                        offset + count,
                        count,
                    ));
                }
                Err(err) => {
                    // Non-fatal: serve the first page without a next link.
                    tracing::warn!(error = %err, "failed to store pagination state");
                }
            }
        }

        let entries = docs
            .into_iter()
            .enumerate()
            .map(|(i, (key, doc))| {
                let is_match = offset + i < primary_count;
                (key, doc, is_match)
            })
            .collect::<Vec<_>>();

        let entries = match summary {
            Some(mode) => entries
                .into_iter()
                .map(|(key, doc, m)| (key, project_summary(doc, mode), m))
                .collect(),
            None => entries,
        };

        Ok(self.make_bundle(
            base_url,
            tenant,
            resource_type,
            self_query,
            entries,
            total,
            next,
            prev_link(base_url, tenant, resource_type, self_query, offset, count),
        ))
    }

    async fn continuation(
        &self,
        tenant: &str,
        resource_type: &str,
        token: &str,
        offset: usize,
        count: usize,
        summary: Option<SummaryMode>,
    ) -> Result<Value> {
        let state = self.cache.load(tenant, token).await?;
        if state.resource_type != resource_type {
            return Err(CoreError::invalid_request(format!(
                "pagination token was issued for {}, not {resource_type}",
                state.resource_type
            )));
        }

        let page_keys: Vec<String> = state
            .all_document_keys
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect();
        let docs = self.fetch_documents(tenant, &page_keys).await?;

        let next = if offset + count < state.all_document_keys.len() {
            Some(page_link(
                &state.base_url,
                tenant,
                resource_type,
                token,
                offset + count,
                count,
            ))
        } else {
            None
        };
        let prev = if offset > 0 {
            Some(page_link(
                &state.base_url,
                tenant,
                resource_type,
                token,
                offset.saturating_sub(count),
                count,
            ))
        } else {
            None
        };

        let entries: Vec<(String, Value, bool)> = docs
            .into_iter()
            .enumerate()
            .map(|(i, (key, doc))| {
                let is_match = offset + i < state.primary_resource_count;
                let doc = match summary {
                    Some(mode) => project_summary(doc, mode),
                    None => doc,
                };
                (key, doc, is_match)
            })
            .collect();

        let self_query = format!("_page={token}&_offset={offset}&_count={count}");
        Ok(self.make_bundle(
            &state.base_url,
            tenant,
            resource_type,
            &self_query,
            entries,
            Some(state.primary_resource_count as u64),
            next,
            prev,
        ))
    }

    /// Batch-read documents grouped by their owning collection, preserving
    /// the requested key order.
    async fn fetch_documents(
        &self,
        tenant: &str,
        keys: &[String],
    ) -> Result<Vec<(String, Value)>> {
        let mut by_collection: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in keys {
            let (resource_type, _) = parse_resource_key(key)?;
            let collection = self.router.target_collection(resource_type)?;
            by_collection
                .entry(collection.to_string())
                .or_default()
                .push(key.clone());
        }

        let mut found: BTreeMap<String, Value> = BTreeMap::new();
        for (collection, collection_keys) in by_collection {
            let handle = self
                .gateway
                .collection(tenant, SCOPE_RESOURCES, &collection)?;
            for (key, doc) in handle.get_many(&collection_keys).await? {
                found.insert(key, doc);
            }
        }

        Ok(keys
            .iter()
            .filter_map(|key| found.get(key).map(|doc| (key.clone(), doc.clone())))
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    fn make_bundle(
        &self,
        base_url: &str,
        tenant: &str,
        resource_type: &str,
        self_query: &str,
        entries: Vec<(String, Value, bool)>,
        total: Option<u64>,
        next: Option<String>,
        prev: Option<String>,
    ) -> Value {
        let mut links = vec![json!({
            "relation": "self",
            "url": if self_query.is_empty() {
                format!("{base_url}/fhir/{tenant}/{resource_type}")
            } else {
                format!("{base_url}/fhir/{tenant}/{resource_type}?{self_query}")
            }
        })];
        if let Some(next) = next {
            links.push(json!({"relation": "next", "url": next}));
        }
        if let Some(prev) = prev {
            links.push(json!({"relation": "previous", "url": prev}));
        }

        let entry: Vec<Value> = entries
            .into_iter()
            .map(|(key, resource, is_match)| {
                json!({
                    "fullUrl": format!("{base_url}/fhir/{tenant}/{key}"),
                    "resource": resource,
                    "search": {"mode": if is_match { "match" } else { "include" }}
                })
            })
            .collect();

        let mut bundle = json!({
            "resourceType": "Bundle",
            "id": new_token(),
            "type": "searchset",
            "link": links,
            "entry": entry,
        });
        if let Some(total) = total {
            bundle
                .as_object_mut()
                .unwrap()
                .insert("total".to_string(), json!(total));
        }
        bundle
    }

    fn resolve_sort(
        &self,
        resource_type: &str,
        params: &ParsedParameters,
    ) -> Result<Vec<SortSpec>> {
        let mut out = Vec::new();
        for (name, descending) in params.sort() {
            let field = match name.as_str() {
                "_lastUpdated" => "meta.lastUpdated".to_string(),
                "_id" => "id".to_string(),
                other => {
                    let def = self.schema.param(resource_type, other).ok_or_else(|| {
                        CoreError::invalid_request(format!(
                            "cannot sort by unknown parameter '{other}'"
                        ))
                    })?;
                    let expr = ParsedExpression::parse(resource_type, def.expression)?;
                    let path = expr
                        .alternatives()
                        .into_iter()
                        .find_map(|alt| alt.resolved_path())
                        .ok_or_else(|| {
                            CoreError::invalid_request(format!(
                                "parameter '{other}' is not sortable"
                            ))
                        })?;
                    match self
                        .schema
                        .kind_of(resource_type, &path)
                        .map(|k| k.string_subfields())
                        .unwrap_or(&[])
                    {
                        [] => path,
                        subfields => format!("{path}.{}", subfields[0]),
                    }
                }
            };
            out.push(SortSpec { field, descending });
        }
        Ok(out)
    }
}

fn page_link(
    base_url: &str,
    tenant: &str,
    resource_type: &str,
    token: &str,
    offset: usize,
    count: usize,
) -> String {
    format!(
        "{base_url}/fhir/{tenant}/{resource_type}?_page={token}&_offset={offset}&_count={count}"
    )
}

/// `previous` link on the fresh path exists only when the caller offset into
/// the result with `_offset`.
fn prev_link(
    base_url: &str,
    tenant: &str,
    resource_type: &str,
    self_query: &str,
    offset: usize,
    count: usize,
) -> Option<String> {
    if offset == 0 || self_query.contains("_page=") {
        return None;
    }
    Some(format!(
        "{base_url}/fhir/{tenant}/{resource_type}?_offset={}&_count={count}",
        offset.saturating_sub(count)
    ))
}

/// Project a resource body per `_summary`.
fn project_summary(doc: Value, mode: SummaryMode) -> Value {
    let mut map = match doc {
        Value::Object(map) => map,
        other => return other,
    };
    match mode {
        SummaryMode::Text => {
            let keep = ["resourceType", "id", "meta", "text"];
            map.retain(|k, _| keep.contains(&k.as_str()));
        }
        SummaryMode::Data => {
            map.remove("text");
        }
        SummaryMode::True => {
            map.remove("text");
            let tag = json!({
                "system": "http://terminology.hl7.org/CodeSystem/v3-ObservationValue",
                "code": "SUBSETTED"
            });
            let meta = map
                .entry("meta".to_string())
                .or_insert_with(|| json!({}));
            if let Some(meta_obj) = meta.as_object_mut() {
                let tags = meta_obj
                    .entry("tag".to_string())
                    .or_insert_with(|| json!([]));
                if let Some(arr) = tags.as_array_mut() {
                    arr.push(tag);
                }
            }
        }
    }
    Value::Object(map)
}
