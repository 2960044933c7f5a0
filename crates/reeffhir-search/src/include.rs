//! `_include` / `_revinclude` parameter parsing.

use reeffhir_core::{CoreError, Result};

use crate::parameters::SearchParamType;
use crate::registry::SearchSchema;

/// A parsed `_include` or `_revinclude` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeParam {
    /// Resource type the reference parameter lives on.
    pub source_type: String,
    /// The reference-typed search parameter.
    pub search_param: String,
    /// Optional target-type filter (`Type:param:Target`).
    pub target_type: Option<String>,
    /// `:iterate` was requested.
    pub iterate: bool,
    /// True for `_revinclude`.
    pub reverse: bool,
}

/// Parse a `Type:searchParam[:TargetType]` include value and validate it
/// against the registry.
pub fn parse_include(
    value: &str,
    iterate: bool,
    reverse: bool,
    schema: &SearchSchema,
) -> Result<IncludeParam> {
    let mut parts = value.split(':');
    let source_type = parts.next().unwrap_or("");
    let search_param = parts.next().ok_or_else(|| {
        CoreError::invalid_request(format!(
            "include value '{value}' must use Type:searchParam format"
        ))
    })?;
    let target_type = parts.next().map(str::to_string);
    if parts.next().is_some() {
        return Err(CoreError::invalid_request(format!(
            "include value '{value}' has too many segments"
        )));
    }

    let def = schema.param(source_type, search_param).ok_or_else(|| {
        CoreError::invalid_request(format!(
            "unknown search parameter '{search_param}' on {source_type}"
        ))
    })?;
    if def.param_type != SearchParamType::Reference {
        return Err(CoreError::invalid_request(format!(
            "'{search_param}' on {source_type} is not a reference parameter"
        )));
    }
    if let Some(target) = &target_type {
        if !def.targets.contains(&target.as_str()) {
            return Err(CoreError::invalid_request(format!(
                "'{search_param}' on {source_type} cannot target {target}"
            )));
        }
    }

    Ok(IncludeParam {
        source_type: source_type.to_string(),
        search_param: search_param.to_string(),
        target_type,
        iterate,
        reverse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_and_param() {
        let schema = SearchSchema::new();
        let inc = parse_include("Observation:patient", false, false, &schema).unwrap();
        assert_eq!(inc.source_type, "Observation");
        assert_eq!(inc.search_param, "patient");
        assert!(inc.target_type.is_none());
        assert!(!inc.reverse);
    }

    #[test]
    fn parses_target_filter() {
        let schema = SearchSchema::new();
        let inc = parse_include("Observation:subject:Patient", false, true, &schema).unwrap();
        assert_eq!(inc.target_type.as_deref(), Some("Patient"));
        assert!(inc.reverse);
    }

    #[test]
    fn rejects_bad_shapes() {
        let schema = SearchSchema::new();
        assert!(parse_include("Observation", false, false, &schema).is_err());
        assert!(parse_include("Observation:nope", false, false, &schema).is_err());
        // status is a token parameter, not a reference.
        assert!(parse_include("Observation:status", false, false, &schema).is_err());
        // subject cannot target Organization.
        assert!(parse_include("Observation:subject:Organization", false, false, &schema).is_err());
    }
}
