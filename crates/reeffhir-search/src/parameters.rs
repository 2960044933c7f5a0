//! Search-parameter model: types, modifiers, prefixes, and definitions.

use reeffhir_core::{CoreError, Result};

/// FHIR search parameter types handled by this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchParamType {
    Token,
    String,
    Date,
    Reference,
    Quantity,
}

/// Search modifiers recognized on parameter names (`name:exact=...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchModifier {
    /// Exact (case-sensitive) string match against the `*Exact` field variant.
    Exact,
    /// Presence test; the value is `true` or `false`.
    Missing,
    /// Token negation.
    Not,
}

impl SearchModifier {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "exact" => Ok(Self::Exact),
            "missing" => Ok(Self::Missing),
            "not" => Ok(Self::Not),
            other => Err(CoreError::invalid_request(format!(
                "unsupported search modifier ':{other}'"
            ))),
        }
    }
}

/// Comparison prefixes on date and quantity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ap,
}

impl SearchPrefix {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "lt" => Some(Self::Lt),
            "le" => Some(Self::Le),
            "gt" => Some(Self::Gt),
            "ge" => Some(Self::Ge),
            "ap" => Some(Self::Ap),
            _ => None,
        }
    }

    /// Split a leading prefix off a value. Only called for date/quantity
    /// values, where a two-letter prefix is unambiguous.
    pub fn split(value: &str) -> (Option<Self>, &str) {
        if value.len() >= 2 && value.is_char_boundary(2) {
            if let Some(prefix) = Self::parse(&value[..2]) {
                return (Some(prefix), &value[2..]);
            }
        }
        (None, value)
    }
}

/// Definition of one search parameter on one resource type.
#[derive(Debug, Clone)]
pub struct SearchParamDef {
    pub name: &'static str,
    pub param_type: SearchParamType,
    /// FHIRPath expression as published in the parameter definition.
    pub expression: &'static str,
    /// Allowed target types (reference parameters only).
    pub targets: &'static [&'static str],
}

impl SearchParamDef {
    pub const fn new(
        name: &'static str,
        param_type: SearchParamType,
        expression: &'static str,
    ) -> Self {
        Self {
            name,
            param_type,
            expression,
            targets: &[],
        }
    }

    pub const fn reference(
        name: &'static str,
        expression: &'static str,
        targets: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            param_type: SearchParamType::Reference,
            expression,
            targets,
        }
    }
}
