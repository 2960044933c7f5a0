//! One helper per FHIR search-parameter type. Each helper turns the values
//! of one parameter occurrence into a single FTS clause; the engine conjoins
//! clauses across parameters.

pub mod date;
pub mod quantity;
pub mod reference;
pub mod string;
pub mod token;

use reeffhir_gateway::QueryNode;

use crate::fhirpath::ParsedExpression;

/// A field alternative an expression resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolvedPath {
    Field(String),
    /// Extension value: clauses must be guarded by a match on the url.
    Extension { url: String, value_field: String },
}

impl ResolvedPath {
    /// Field path the value clause targets.
    pub(crate) fn value_field(&self) -> String {
        match self {
            Self::Field(path) => path.clone(),
            Self::Extension { value_field, .. } => format!("extension.{value_field}"),
        }
    }

    /// Wrap a clause with the extension url guard where needed.
    pub(crate) fn guard(&self, clause: QueryNode) -> QueryNode {
        match self {
            Self::Field(_) => clause,
            Self::Extension { url, .. } => QueryNode::conjuncts(vec![
                QueryNode::term("extension.url", url.clone()),
                clause,
            ]),
        }
    }
}

/// Flatten an expression into its field alternatives.
pub(crate) fn resolve_paths(expr: &ParsedExpression) -> Vec<ResolvedPath> {
    expr.alternatives()
        .into_iter()
        .filter_map(|alt| match alt {
            ParsedExpression::Extension { url, value_field } => Some(ResolvedPath::Extension {
                url: url.clone(),
                value_field: value_field.clone(),
            }),
            other => other.resolved_path().map(ResolvedPath::Field),
        })
        .collect()
}

/// Presence clause over a set of fields; `missing=true` negates it.
pub(crate) fn missing_clause(fields: Vec<String>, missing: bool) -> QueryNode {
    let present = QueryNode::disjuncts(fields.into_iter().map(QueryNode::exists).collect());
    if missing {
        QueryNode::negate(present)
    } else {
        present
    }
}

/// Interpret the value of a `:missing` modifier.
pub(crate) fn parse_missing_value(values: &[String]) -> bool {
    values
        .first()
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
