//! Reference search: matches `<path>.reference` against `Type/id`.

use reeffhir_core::{CoreError, Result};
use reeffhir_gateway::QueryNode;

use crate::fhirpath::ParsedExpression;
use crate::parameters::{SearchModifier, SearchParamDef};
use crate::registry::SearchSchema;
use crate::types::{ResolvedPath, missing_clause, parse_missing_value, resolve_paths};

/// Resolve a raw reference value to the full `Type/id` form. A bare id is
/// only unambiguous when the parameter has exactly one target type (or its
/// expression names one via `resolve() is Type`).
fn qualify_value<'a>(
    def: &SearchParamDef,
    expr_target: Option<&str>,
    value: &'a str,
) -> Result<String> {
    if value.contains('/') {
        return Ok(value.to_string());
    }
    if let Some(target) = expr_target {
        return Ok(format!("{target}/{value}"));
    }
    match def.targets {
        [single] => Ok(format!("{single}/{value}")),
        [] => Err(CoreError::invalid_request(format!(
            "reference parameter '{}' has no declared target type for bare id '{value}'",
            def.name
        ))),
        _ => Err(CoreError::invalid_request(format!(
            "reference '{value}' is ambiguous for parameter '{}'; use Type/id",
            def.name
        ))),
    }
}

pub fn build_clause(
    _schema: &SearchSchema,
    _resource_type: &str,
    def: &SearchParamDef,
    expr: &ParsedExpression,
    modifier: Option<&SearchModifier>,
    values: &[String],
) -> Result<QueryNode> {
    let paths = resolve_paths(expr);
    if paths.is_empty() {
        return Err(CoreError::invalid_request(format!(
            "parameter '{}' has no addressable field",
            def.name
        )));
    }

    if let Some(SearchModifier::Missing) = modifier {
        let fields = paths
            .iter()
            .map(|p| format!("{}.reference", p.value_field()))
            .collect();
        return Ok(missing_clause(fields, parse_missing_value(values)));
    }
    if modifier.is_some() {
        return Err(CoreError::invalid_request(format!(
            "unsupported modifier on reference parameter '{}'",
            def.name
        )));
    }

    // A `where(resolve() is Type)` restriction also disambiguates bare ids.
    let expr_target = expr.alternatives().into_iter().find_map(|alt| match alt {
        ParsedExpression::ReferenceWhere {
            target: Some(t), ..
        } => Some(t.as_str()),
        _ => None,
    });

    let mut value_clauses = Vec::with_capacity(values.len());
    for value in values {
        if value.is_empty() {
            return Err(CoreError::invalid_request(format!(
                "empty reference value for parameter '{}'",
                def.name
            )));
        }
        let full = qualify_value(def, expr_target, value)?;
        let path_clauses = paths
            .iter()
            .map(|p| {
                p.guard(QueryNode::term(
                    format!("{}.reference", p.value_field()),
                    full.clone(),
                ))
            })
            .collect();
        value_clauses.push(QueryNode::disjuncts(path_clauses));
    }

    Ok(QueryNode::disjuncts(value_clauses))
}
