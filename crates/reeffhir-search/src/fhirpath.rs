//! Parser for the FHIRPath expressions attached to search parameters.
//!
//! Search-parameter expressions use a small, regular subset of FHIRPath:
//! dotted field paths, unions, casts to choice-type variants, extension
//! selectors, and `where(...)` restrictions on references. The parser tags
//! each expression with its shape and strips the resource-type prefix so the
//! result addresses the document body directly.

use reeffhir_core::{CoreError, Result};

use crate::registry::capitalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedExpression {
    /// `Resource.field[.subfield]*`
    SimpleField { path: String },
    /// `exprA | exprB [| ...]`, alternatives in source order.
    Union(Vec<ParsedExpression>),
    /// `Resource.extension.where(url = 'URL').value[X]`
    Extension { url: String, value_field: String },
    /// `field.where(resolve() is Type)` or a generic `field.where(...)`.
    ReferenceWhere {
        path: String,
        target: Option<String>,
    },
    /// `(Resource.field as Type)` or `field.as(Type)`.
    Cast { path: String, fhir_type: String },
}

impl ParsedExpression {
    /// Parse an expression for a parameter declared on `resource_type`.
    pub fn parse(resource_type: &str, expression: &str) -> Result<Self> {
        let parts = split_union(expression);
        if parts.len() > 1 {
            let alternatives = parts
                .into_iter()
                .map(|p| parse_single(resource_type, p.trim()))
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::Union(alternatives))
        } else {
            parse_single(resource_type, expression.trim())
        }
    }

    /// Flatten unions into the list of alternatives (self for non-unions).
    pub fn alternatives(&self) -> Vec<&ParsedExpression> {
        match self {
            Self::Union(parts) => parts.iter().flat_map(|p| p.alternatives()).collect(),
            other => vec![other],
        }
    }

    /// Document-relative field path this alternative addresses, if it has
    /// one. Casts carry the capitalized type suffix.
    pub fn resolved_path(&self) -> Option<String> {
        match self {
            Self::SimpleField { path } => Some(path.clone()),
            Self::ReferenceWhere { path, .. } => Some(path.clone()),
            Self::Cast { path, fhir_type } => Some(format!("{path}{}", capitalize(fhir_type))),
            Self::Extension { value_field, .. } => Some(format!("extension.{value_field}")),
            Self::Union(_) => None,
        }
    }
}

/// Split on `|` at the top level (outside parentheses and quotes).
fn split_union(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0usize;
    for (i, c) in expression.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth = depth.saturating_sub(1),
            '|' if !in_quote && depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}

fn parse_single(resource_type: &str, expression: &str) -> Result<ParsedExpression> {
    let expr = expression.trim();
    if expr.is_empty() {
        return Err(CoreError::invalid_request("empty search expression"));
    }

    // Parenthesized cast: `(Resource.field as Type)`
    if expr.starts_with('(') && expr.ends_with(')') {
        let inner = &expr[1..expr.len() - 1];
        if let Some((left, right)) = split_top_level(inner, " as ") {
            return Ok(ParsedExpression::Cast {
                path: strip_type_prefix(resource_type, left.trim()),
                fhir_type: right.trim().to_string(),
            });
        }
        return parse_single(resource_type, inner);
    }

    // Function-style cast: `field.as(Type)`
    if let Some(at) = expr.find(".as(") {
        let close = expr[at..]
            .find(')')
            .ok_or_else(|| CoreError::invalid_request(format!("unbalanced cast in '{expr}'")))?;
        let fhir_type = expr[at + 4..at + close].trim().to_string();
        return Ok(ParsedExpression::Cast {
            path: strip_type_prefix(resource_type, &expr[..at]),
            fhir_type,
        });
    }

    // Extension selector: `Resource.extension.where(url = 'URL').value[X]`
    if let Some(at) = expr.find("extension.where(") {
        let after = &expr[at + "extension.where(".len()..];
        let close = after.find(')').ok_or_else(|| {
            CoreError::invalid_request(format!("unbalanced where-clause in '{expr}'"))
        })?;
        let clause = &after[..close];
        let url = clause
            .split('\'')
            .nth(1)
            .ok_or_else(|| {
                CoreError::invalid_request(format!("extension selector without url in '{expr}'"))
            })?
            .to_string();
        let value_field = after[close + 1..].trim_start_matches('.').to_string();
        if value_field.is_empty() {
            return Err(CoreError::invalid_request(format!(
                "extension selector without value field in '{expr}'"
            )));
        }
        return Ok(ParsedExpression::Extension { url, value_field });
    }

    // Reference restriction: `field.where(resolve() is Type)` / `field.where(...)`
    if let Some(at) = expr.find(".where(") {
        let path = strip_type_prefix(resource_type, &expr[..at]);
        let after = &expr[at + ".where(".len()..];
        let close = after.find(')').ok_or_else(|| {
            CoreError::invalid_request(format!("unbalanced where-clause in '{expr}'"))
        })?;
        let clause = after[..close].trim();
        let target = clause
            .strip_prefix("resolve() is ")
            .map(|t| t.trim().to_string());
        return Ok(ParsedExpression::ReferenceWhere { path, target });
    }

    Ok(ParsedExpression::SimpleField {
        path: strip_type_prefix(resource_type, expr),
    })
}

/// Find `needle` at parenthesis depth zero.
fn split_top_level<'a>(haystack: &'a str, needle: &str) -> Option<(&'a str, &'a str)> {
    let mut depth = 0usize;
    let bytes = haystack.as_bytes();
    let nlen = needle.len();
    for i in 0..haystack.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && haystack[i..].starts_with(needle) => {
                return Some((&haystack[..i], &haystack[i + nlen..]));
            }
            _ => {}
        }
    }
    None
}

/// Drop a leading resource-type segment so the path addresses the body.
/// Any capitalized first segment is a type prefix (field names are
/// lower-camel-case), which also handles union alternatives that name a
/// different resource type.
fn strip_type_prefix(resource_type: &str, path: &str) -> String {
    let path = path.trim();
    if let Some((first, rest)) = path.split_once('.') {
        let is_prefix =
            first == resource_type || first.chars().next().is_some_and(|c| c.is_uppercase());
        if is_prefix && !rest.is_empty() {
            return rest.to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_field_strips_prefix() {
        let parsed = ParsedExpression::parse("Patient", "Patient.birthDate").unwrap();
        assert_eq!(
            parsed,
            ParsedExpression::SimpleField {
                path: "birthDate".into()
            }
        );
        assert_eq!(parsed.resolved_path().unwrap(), "birthDate");
    }

    #[test]
    fn nested_field() {
        let parsed = ParsedExpression::parse("Patient", "Patient.name.family").unwrap();
        assert_eq!(parsed.resolved_path().unwrap(), "name.family");
    }

    #[test]
    fn union_keeps_source_order() {
        let parsed =
            ParsedExpression::parse("Organization", "Organization.name | Organization.alias")
                .unwrap();
        let alts = parsed.alternatives();
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[0].resolved_path().unwrap(), "name");
        assert_eq!(alts[1].resolved_path().unwrap(), "alias");
    }

    #[test]
    fn union_across_resource_types() {
        let parsed = ParsedExpression::parse("Patient", "Patient.name | Organization.alias").unwrap();
        let alts = parsed.alternatives();
        assert_eq!(alts[1].resolved_path().unwrap(), "alias");
    }

    #[test]
    fn parenthesized_cast_appends_capitalized_suffix() {
        let parsed =
            ParsedExpression::parse("Patient", "(Patient.deceased as dateTime)").unwrap();
        assert_eq!(
            parsed,
            ParsedExpression::Cast {
                path: "deceased".into(),
                fhir_type: "dateTime".into()
            }
        );
        assert_eq!(parsed.resolved_path().unwrap(), "deceasedDateTime");
    }

    #[test]
    fn function_cast() {
        let parsed = ParsedExpression::parse("Observation", "Observation.effective.as(Period)")
            .unwrap();
        assert_eq!(parsed.resolved_path().unwrap(), "effectivePeriod");
    }

    #[test]
    fn quantity_cast() {
        let parsed =
            ParsedExpression::parse("Observation", "(Observation.value as Quantity)").unwrap();
        assert_eq!(parsed.resolved_path().unwrap(), "valueQuantity");
    }

    #[test]
    fn extension_selector() {
        let parsed = ParsedExpression::parse(
            "Patient",
            "Patient.extension.where(url = 'http://example.org/birthPlace').valueAddress",
        )
        .unwrap();
        assert_eq!(
            parsed,
            ParsedExpression::Extension {
                url: "http://example.org/birthPlace".into(),
                value_field: "valueAddress".into()
            }
        );
        assert_eq!(parsed.resolved_path().unwrap(), "extension.valueAddress");
    }

    #[test]
    fn reference_where_with_resolve() {
        let parsed = ParsedExpression::parse(
            "Observation",
            "Observation.subject.where(resolve() is Patient)",
        )
        .unwrap();
        assert_eq!(
            parsed,
            ParsedExpression::ReferenceWhere {
                path: "subject".into(),
                target: Some("Patient".into())
            }
        );
    }

    #[test]
    fn generic_where_clause() {
        let parsed =
            ParsedExpression::parse("Patient", "Patient.telecom.where(system='phone')").unwrap();
        assert_eq!(
            parsed,
            ParsedExpression::ReferenceWhere {
                path: "telecom".into(),
                target: None
            }
        );
    }

    #[test]
    fn union_with_casts() {
        let parsed = ParsedExpression::parse(
            "Observation",
            "(Observation.effective as dateTime) | (Observation.effective as Period)",
        )
        .unwrap();
        let alts = parsed.alternatives();
        assert_eq!(alts[0].resolved_path().unwrap(), "effectiveDateTime");
        assert_eq!(alts[1].resolved_path().unwrap(), "effectivePeriod");
    }

    #[test]
    fn empty_expression_is_invalid() {
        assert!(ParsedExpression::parse("Patient", "").is_err());
        assert!(ParsedExpression::parse("Patient", "  |  ").is_err());
    }
}
