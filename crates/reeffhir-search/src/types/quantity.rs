//! Quantity search: numeric ranges over Quantity `.value` leaves.

use reeffhir_core::{CoreError, Result};
use reeffhir_gateway::QueryNode;

use crate::fhirpath::ParsedExpression;
use crate::parameters::{SearchModifier, SearchParamDef, SearchPrefix};
use crate::registry::SearchSchema;
use crate::types::{ResolvedPath, missing_clause, parse_missing_value, resolve_paths};

/// Widening factor for the `ap` prefix.
const APPROX_FRACTION: f64 = 0.1;

pub fn build_clause(
    schema: &SearchSchema,
    resource_type: &str,
    def: &SearchParamDef,
    expr: &ParsedExpression,
    modifier: Option<&SearchModifier>,
    values: &[String],
) -> Result<QueryNode> {
    let fields = expand_value_fields(schema, resource_type, expr);
    if fields.is_empty() {
        return Err(CoreError::invalid_request(format!(
            "parameter '{}' has no quantity field",
            def.name
        )));
    }

    if let Some(SearchModifier::Missing) = modifier {
        let names = fields.iter().map(|(_, f)| f.clone()).collect();
        return Ok(missing_clause(names, parse_missing_value(values)));
    }
    if modifier.is_some() {
        return Err(CoreError::invalid_request(format!(
            "unsupported modifier on quantity parameter '{}'",
            def.name
        )));
    }

    let mut value_clauses = Vec::with_capacity(values.len());
    for value in values {
        let (prefix, rest) = SearchPrefix::split(value);
        // `value|system|code` — only the numeric part constrains the query;
        // unit matching is delegated to the indexed unit fields when present.
        let number_part = rest.split('|').next().unwrap_or(rest);
        let number: f64 = number_part.trim().parse().map_err(|_| {
            CoreError::invalid_request(format!(
                "invalid quantity value '{value}' for parameter '{}'",
                def.name
            ))
        })?;

        let field_clauses: Vec<QueryNode> = fields
            .iter()
            .map(|(path, field)| {
                path.guard(prefix_clause(
                    field,
                    prefix.unwrap_or(SearchPrefix::Eq),
                    number,
                ))
            })
            .collect();
        value_clauses.push(QueryNode::disjuncts(field_clauses));
    }

    Ok(QueryNode::disjuncts(value_clauses))
}

fn prefix_clause(field: &str, prefix: SearchPrefix, value: f64) -> QueryNode {
    let range = |min: Option<f64>, max: Option<f64>, incl_min: bool, incl_max: bool| {
        QueryNode::NumericRange {
            field: field.to_string(),
            min,
            max,
            inclusive_min: incl_min,
            inclusive_max: incl_max,
        }
    };
    match prefix {
        SearchPrefix::Eq => range(Some(value), Some(value), true, true),
        SearchPrefix::Ne => QueryNode::negate(range(Some(value), Some(value), true, true)),
        SearchPrefix::Lt => range(None, Some(value), true, false),
        SearchPrefix::Le => range(None, Some(value), true, true),
        SearchPrefix::Gt => range(Some(value), None, false, true),
        SearchPrefix::Ge => range(Some(value), None, true, true),
        SearchPrefix::Ap => {
            let delta = (value * APPROX_FRACTION).abs();
            range(Some(value - delta), Some(value + delta), true, true)
        }
    }
}

fn expand_value_fields(
    schema: &SearchSchema,
    resource_type: &str,
    expr: &ParsedExpression,
) -> Vec<(ResolvedPath, String)> {
    let mut fields = Vec::new();
    for path in resolve_paths(expr) {
        match &path {
            ResolvedPath::Field(p) => {
                for leaf in schema.quantity_leaves(resource_type, p) {
                    fields.push((path.clone(), format!("{leaf}.value")));
                }
            }
            ResolvedPath::Extension { .. } => {
                fields.push((path.clone(), format!("{}.value", path.value_field())));
            }
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(values: &[&str]) -> Result<QueryNode> {
        let schema = SearchSchema::new();
        let def = schema.param("Observation", "value-quantity").unwrap();
        let expr = ParsedExpression::parse("Observation", def.expression).unwrap();
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        build_clause(&schema, "Observation", def, &expr, None, &values)
    }

    #[test]
    fn choice_element_expands_to_quantity_value_leaf() {
        let node = build(&["5.4"]).unwrap();
        let json = node.to_json();
        assert_eq!(json["field"], "valueQuantity.value");
        assert_eq!(json["min"], 5.4);
        assert_eq!(json["max"], 5.4);
    }

    #[test]
    fn prefixes_map_to_bounds() {
        let json = build(&["gt5"]).unwrap().to_json();
        assert_eq!(json["min"], 5.0);
        assert_eq!(json["inclusive_min"], false);
        assert!(json.get("max").is_none());

        let json = build(&["le10"]).unwrap().to_json();
        assert_eq!(json["max"], 10.0);
        assert_eq!(json["inclusive_max"], true);
    }

    #[test]
    fn ap_widens_by_ten_percent() {
        let json = build(&["ap100"]).unwrap().to_json();
        assert_eq!(json["min"], 90.0);
        assert_eq!(json["max"], 110.0);
    }

    #[test]
    fn unit_suffix_is_tolerated() {
        let json = build(&["5.4|http://unitsofmeasure.org|mg"]).unwrap().to_json();
        assert_eq!(json["min"], 5.4);
    }

    #[test]
    fn ne_negates() {
        let json = build(&["ne7"]).unwrap().to_json();
        assert!(json.get("must_not").is_some());
    }

    #[test]
    fn garbage_is_invalid_request() {
        let err = build(&["heavy"]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }
}
