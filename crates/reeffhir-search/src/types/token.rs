//! Token search: coded elements, identifiers, and primitive codes.

use reeffhir_core::{CoreError, Result};
use reeffhir_gateway::QueryNode;

use crate::fhirpath::ParsedExpression;
use crate::parameters::{SearchModifier, SearchParamDef};
use crate::registry::{FieldKind, SearchSchema};
use crate::types::{ResolvedPath, missing_clause, parse_missing_value, resolve_paths};

/// Split a token value into its system and code parts.
///
/// `system|code` matches both; `|code` matches a code carried without a
/// system; a bare `code` matches regardless of system.
pub fn parse_token_value(value: &str) -> (Option<&str>, &str) {
    match value.split_once('|') {
        Some((system, code)) => (Some(system), code),
        None => (None, value),
    }
}

/// Fields a token clause targets for a given element kind.
fn token_fields(kind: Option<FieldKind>, path: &str) -> (String, Option<String>, bool) {
    match kind {
        Some(FieldKind::CodeableConcept) => (
            format!("{path}.coding.code"),
            Some(format!("{path}.coding.system")),
            false,
        ),
        Some(FieldKind::Coding) => {
            (format!("{path}.code"), Some(format!("{path}.system")), false)
        }
        Some(FieldKind::Identifier) | Some(FieldKind::ContactPoint) => {
            (format!("{path}.value"), Some(format!("{path}.system")), false)
        }
        Some(FieldKind::Boolean) => (path.to_string(), None, true),
        // code / uri / string primitives: equality on the leaf.
        _ => (path.to_string(), None, false),
    }
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
    if paths.is_empty() {
        return Err(CoreError::invalid_request(format!(
            "parameter '{}' has no addressable field",
            def.name
        )));
    }

    if let Some(SearchModifier::Missing) = modifier {
        let fields = paths
            .iter()
            .map(|p| {
                let kind = field_kind(schema, resource_type, p);
                token_fields(kind, &p.value_field()).0
            })
            .collect();
        return Ok(missing_clause(fields, parse_missing_value(values)));
    }

    if let Some(SearchModifier::Exact) = modifier {
        return Err(CoreError::invalid_request(format!(
            ":exact is not valid on token parameter '{}'",
            def.name
        )));
    }

    let mut value_clauses = Vec::with_capacity(values.len());
    for value in values {
        let (system, code) = parse_token_value(value);
        if code.is_empty() && system.map_or(true, str::is_empty) {
            return Err(CoreError::invalid_request(format!(
                "empty token value for parameter '{}'",
                def.name
            )));
        }

        let mut path_clauses = Vec::with_capacity(paths.len());
        for path in &paths {
            let kind = field_kind(schema, resource_type, path);
            let (code_field, system_field, boolean) = token_fields(kind, &path.value_field());

            let clause = if boolean {
                let flag = match code {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(CoreError::invalid_request(format!(
                            "boolean parameter '{}' expects true or false, got '{other}'",
                            def.name
                        )));
                    }
                };
                QueryNode::bool_field(code_field, flag)
            } else {
                let code_clause = QueryNode::term(code_field, code);
                match (system, &system_field) {
                    // `|code`: the coded value must carry no system.
                    (Some(""), Some(sys_field)) => QueryNode::conjuncts(vec![
                        code_clause,
                        QueryNode::negate(QueryNode::exists(sys_field.clone())),
                    ]),
                    (Some(sys), Some(sys_field)) if !sys.is_empty() => QueryNode::conjuncts(vec![
                        QueryNode::term(sys_field.clone(), sys),
                        code_clause,
                    ]),
                    _ => code_clause,
                }
            };
            path_clauses.push(path.guard(clause));
        }
        value_clauses.push(QueryNode::disjuncts(path_clauses));
    }

    let clause = QueryNode::disjuncts(value_clauses);
    match modifier {
        Some(SearchModifier::Not) => Ok(QueryNode::negate(clause)),
        _ => Ok(clause),
    }
}

fn field_kind(
    schema: &SearchSchema,
    resource_type: &str,
    path: &ResolvedPath,
) -> Option<FieldKind> {
    match path {
        ResolvedPath::Field(p) => schema.kind_of(resource_type, p),
        ResolvedPath::Extension { .. } => None,
    }
}
