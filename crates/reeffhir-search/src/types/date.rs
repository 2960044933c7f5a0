//! Date search with choice-type expansion and period-overlap semantics.
//!
//! All values of one parameter (including repeats like
//! `date=ge2025-01-05&date=le2025-01-07`) are folded into bounds before
//! emission, so a bounded pair produces a single overlap query per Period
//! leaf: `conjuncts(start <= E, end >= S)`. One-sided comparisons follow the
//! period rules directly: `gt`/`ge` constrain the period start, `lt`/`le`
//! the period end.

use reeffhir_core::time::{DateRange, format_rfc3339, parse_date_literal};
use reeffhir_core::{CoreError, Result};
use reeffhir_gateway::QueryNode;
use time::OffsetDateTime;

use crate::fhirpath::ParsedExpression;
use crate::parameters::{SearchModifier, SearchParamDef, SearchPrefix};
use crate::registry::{DateLeaf, SearchSchema};
use crate::types::{ResolvedPath, missing_clause, parse_missing_value, resolve_paths};

#[derive(Debug, Clone, Copy)]
struct Bound {
    at: OffsetDateTime,
    inclusive: bool,
}

pub fn build_clause(
    schema: &SearchSchema,
    resource_type: &str,
    def: &SearchParamDef,
    expr: &ParsedExpression,
    modifier: Option<&SearchModifier>,
    values: &[String],
) -> Result<QueryNode> {
    let leaves = expand_leaves(schema, resource_type, expr);
    if leaves.is_empty() {
        return Err(CoreError::invalid_request(format!(
            "parameter '{}' has no date field",
            def.name
        )));
    }

    if let Some(SearchModifier::Missing) = modifier {
        let fields = leaves
            .iter()
            .map(|leaf| {
                if leaf.1.is_period {
                    format!("{}.start", leaf.1.field)
                } else {
                    leaf.1.field.clone()
                }
            })
            .collect();
        return Ok(missing_clause(fields, parse_missing_value(values)));
    }
    if modifier.is_some() {
        return Err(CoreError::invalid_request(format!(
            "unsupported modifier on date parameter '{}'",
            def.name
        )));
    }

    let mut lower: Option<Bound> = None;
    let mut upper: Option<Bound> = None;
    let mut clauses: Vec<QueryNode> = Vec::new();

    for value in values {
        let (prefix, literal) = SearchPrefix::split(value);
        let range = parse_date_literal(literal)?;
        match prefix.unwrap_or(SearchPrefix::Eq) {
            SearchPrefix::Eq | SearchPrefix::Ap => {
                clauses.push(point_clause(&leaves, &range));
            }
            SearchPrefix::Ne => {
                clauses.push(QueryNode::negate(point_clause(&leaves, &range)));
            }
            SearchPrefix::Ge => {
                lower = tighten_lower(lower, Bound { at: range.start, inclusive: true });
            }
            SearchPrefix::Gt => {
                lower = tighten_lower(lower, Bound { at: range.end, inclusive: false });
            }
            SearchPrefix::Le => {
                upper = tighten_upper(upper, Bound { at: range.end, inclusive: true });
            }
            SearchPrefix::Lt => {
                upper = tighten_upper(upper, Bound { at: range.start, inclusive: false });
            }
        }
    }

    if lower.is_some() || upper.is_some() {
        clauses.push(range_clause(&leaves, lower, upper));
    }
    if clauses.is_empty() {
        return Err(CoreError::invalid_request(format!(
            "date parameter '{}' has no usable value",
            def.name
        )));
    }
    Ok(QueryNode::conjuncts(clauses))
}

fn tighten_lower(current: Option<Bound>, candidate: Bound) -> Option<Bound> {
    match current {
        Some(b) if b.at >= candidate.at => Some(b),
        _ => Some(candidate),
    }
}

fn tighten_upper(current: Option<Bound>, candidate: Bound) -> Option<Bound> {
    match current {
        Some(b) if b.at <= candidate.at => Some(b),
        _ => Some(candidate),
    }
}

/// Equality against a literal's implicit range, disjoined across leaves.
fn point_clause(leaves: &[(ResolvedPath, DateLeaf)], range: &DateRange) -> QueryNode {
    let lower = Bound { at: range.start, inclusive: true };
    let upper = Bound { at: range.end, inclusive: true };
    QueryNode::disjuncts(
        leaves
            .iter()
            .map(|(path, leaf)| path.guard(leaf_clause(leaf, Some(lower), Some(upper))))
            .collect(),
    )
}

fn range_clause(
    leaves: &[(ResolvedPath, DateLeaf)],
    lower: Option<Bound>,
    upper: Option<Bound>,
) -> QueryNode {
    QueryNode::disjuncts(
        leaves
            .iter()
            .map(|(path, leaf)| path.guard(leaf_clause(leaf, lower, upper)))
            .collect(),
    )
}

fn leaf_clause(leaf: &DateLeaf, lower: Option<Bound>, upper: Option<Bound>) -> QueryNode {
    if !leaf.is_period {
        return date_range(&leaf.field, lower, upper);
    }
    let start_field = format!("{}.start", leaf.field);
    let end_field = format!("{}.end", leaf.field);
    match (lower, upper) {
        // Bounded [S, E]: the period overlaps the range.
        (Some(lower), Some(upper)) => QueryNode::conjuncts(vec![
            date_range(&start_field, None, Some(upper)),
            date_range(&end_field, Some(lower), None),
        ]),
        // One-sided comparisons constrain the matching period edge.
        (Some(lower), None) => date_range(&start_field, Some(lower), None),
        (None, Some(upper)) => date_range(&end_field, None, Some(upper)),
        (None, None) => QueryNode::exists(start_field),
    }
}

fn date_range(field: &str, lower: Option<Bound>, upper: Option<Bound>) -> QueryNode {
    QueryNode::DateRange {
        field: field.to_string(),
        start: lower.map(|b| format_rfc3339(b.at)),
        end: upper.map(|b| format_rfc3339(b.at)),
        inclusive_start: lower.map(|b| b.inclusive).unwrap_or(true),
        inclusive_end: upper.map(|b| b.inclusive).unwrap_or(true),
    }
}

fn expand_leaves(
    schema: &SearchSchema,
    resource_type: &str,
    expr: &ParsedExpression,
) -> Vec<(ResolvedPath, DateLeaf)> {
    let mut leaves = Vec::new();
    for path in resolve_paths(expr) {
        match &path {
            ResolvedPath::Field(p) => {
                // Cast alternatives resolve to a concrete leaf already; plain
                // paths go through choice-type expansion.
                for leaf in schema.date_leaves(resource_type, p) {
                    leaves.push((path.clone(), leaf));
                }
            }
            ResolvedPath::Extension { .. } => {
                leaves.push((
                    path.clone(),
                    DateLeaf {
                        field: path.value_field(),
                        is_period: false,
                    },
                ));
            }
        }
    }
    leaves
}
