//! String search: case-insensitive prefix by default, `:exact` against the
//! keyword-analyzed `*Exact` field variants.

use reeffhir_core::{CoreError, Result};
use reeffhir_gateway::QueryNode;

use crate::fhirpath::ParsedExpression;
use crate::parameters::{SearchModifier, SearchParamDef};
use crate::registry::SearchSchema;
use crate::types::{ResolvedPath, missing_clause, parse_missing_value, resolve_paths};

/// Expand an expression into concrete string fields using schema reflection:
/// HumanName fans out to family/given/prefix/suffix, Address to its parts,
/// ContactPoint to `value`, plain strings stay as-is. Union alternatives are
/// OR-ed by the caller through the flat field list.
fn expand_fields(
    schema: &SearchSchema,
    resource_type: &str,
    paths: &[ResolvedPath],
) -> Vec<(ResolvedPath, String)> {
    let mut fields = Vec::new();
    for path in paths {
        match path {
            ResolvedPath::Field(p) => {
                let subfields = schema
                    .kind_of(resource_type, p)
                    .map(|k| k.string_subfields())
                    .unwrap_or(&[]);
                if subfields.is_empty() {
                    fields.push((path.clone(), p.clone()));
                } else {
                    for sub in subfields {
                        fields.push((path.clone(), format!("{p}.{sub}")));
                    }
                }
            }
            ResolvedPath::Extension { .. } => {
                fields.push((path.clone(), path.value_field()));
            }
        }
    }
    fields
}

pub fn build_clause(
    schema: &SearchSchema,
    resource_type: &str,
    def: &SearchParamDef,
    expr: &ParsedExpression,
    modifier: Option<&SearchModifier>,
    values: &[String],
) -> Result<QueryNode> {
    let paths = resolve_paths(expr);
    let fields = expand_fields(schema, resource_type, &paths);
    if fields.is_empty() {
        return Err(CoreError::invalid_request(format!(
            "parameter '{}' has no addressable field",
            def.name
        )));
    }

    match modifier {
        Some(SearchModifier::Missing) => {
            let field_names = fields.into_iter().map(|(_, f)| f).collect();
            return Ok(missing_clause(field_names, parse_missing_value(values)));
        }
        Some(SearchModifier::Not) => {
            return Err(CoreError::invalid_request(format!(
                ":not is not valid on string parameter '{}'",
                def.name
            )));
        }
        _ => {}
    }

    let exact = matches!(modifier, Some(SearchModifier::Exact));
    let mut value_clauses = Vec::with_capacity(values.len());
    for value in values {
        if value.is_empty() {
            return Err(CoreError::invalid_request(format!(
                "empty string value for parameter '{}'",
                def.name
            )));
        }
        let field_clauses = fields
            .iter()
            .map(|(path, field)| {
                let clause = if exact {
                    QueryNode::match_value(format!("{field}Exact"), value.clone())
                } else {
                    QueryNode::prefix(field.clone(), value.clone())
                };
                path.guard(clause)
            })
            .collect();
        value_clauses.push(QueryNode::disjuncts(field_clauses));
    }

    Ok(QueryNode::disjuncts(value_clauses))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(
        resource_type: &str,
        param: &str,
        values: &[&str],
        modifier: Option<SearchModifier>,
    ) -> Result<QueryNode> {
        let schema = SearchSchema::new();
        let def = schema.param(resource_type, param).unwrap();
        let expr = ParsedExpression::parse(resource_type, def.expression).unwrap();
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        build_clause(&schema, resource_type, def, &expr, modifier.as_ref(), &values)
    }

    #[test]
    fn human_name_fans_out_to_subfields() {
        let node = build("Patient", "name", &["smi"], None).unwrap();
        let json = node.to_json();
        let fields: Vec<&str> = json["disjuncts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap())
            .collect();
        assert_eq!(
            fields,
            vec!["name.family", "name.given", "name.prefix", "name.suffix"]
        );
        assert!(json["disjuncts"][0].get("prefix").is_some());
    }

    #[test]
    fn address_subfields() {
        let node = build("Patient", "address", &["berlin"], None).unwrap();
        let json = node.to_json();
        assert_eq!(json["disjuncts"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn plain_string_field() {
        let node = build("Patient", "family", &["Smith"], None).unwrap();
        assert_eq!(
            node.to_json(),
            serde_json::json!({"prefix": "Smith", "field": "name.family"})
        );
    }

    #[test]
    fn exact_targets_exact_variant() {
        let node = build("Patient", "family", &["Smith"], Some(SearchModifier::Exact)).unwrap();
        assert_eq!(
            node.to_json(),
            serde_json::json!({"match": "Smith", "field": "name.familyExact"})
        );
    }

    #[test]
    fn union_alternatives_or_across_fields() {
        let node = build("Organization", "name", &["acme"], None).unwrap();
        let json = node.to_json();
        let fields: Vec<&str> = json["disjuncts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["name", "alias"]);
    }

    #[test]
    fn missing_modifier() {
        let node = build("Patient", "family", &["true"], Some(SearchModifier::Missing)).unwrap();
        assert!(node.to_json().get("must_not").is_some());
    }

    #[test]
    fn not_modifier_rejected() {
        let err = build("Patient", "family", &["x"], Some(SearchModifier::Not)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }

    #[test]
    fn empty_value_rejected() {
        let err = build("Patient", "family", &[""], None).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
    }
}
