//! Query-string parsing into search parameters and result controls.

use reeffhir_core::{CoreError, Result};
use url::form_urlencoded;

/// One occurrence of a query parameter. Comma-separated values are split
/// here (they OR at the same parameter); repeated parameters stay separate
/// entries (they AND at the engine layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedParam {
    pub name: String,
    pub modifier: Option<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedParameters {
    pub params: Vec<ParsedParam>,
}

/// How `_summary` projects returned resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryMode {
    True,
    Text,
    Data,
}

/// How `_total` is calculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalMode {
    #[default]
    None,
    Estimate,
    Accurate,
}

/// Parse an `application/x-www-form-urlencoded` query string.
pub fn parse_query(query: &str) -> ParsedParameters {
    let mut result = ParsedParameters::default();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let (name, modifier) = match key.split_once(':') {
            Some((name, modifier)) if !modifier.is_empty() => {
                (name.to_string(), Some(modifier.to_string()))
            }
            _ => (key.into_owned(), None),
        };
        let values: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        result.params.push(ParsedParam {
            name,
            modifier,
            values,
        });
    }
    result
}

impl ParsedParameters {
    fn first(&self, name: &str) -> Option<&ParsedParam> {
        self.params.iter().find(|p| p.name == name)
    }

    fn first_value(&self, name: &str) -> Option<&str> {
        self.first(name)
            .and_then(|p| p.values.first())
            .map(String::as_str)
    }

    /// Effective `_count`, clamped to `[1, max]`; `default_` when absent.
    pub fn count(&self, default_: usize, max: usize) -> Result<usize> {
        match self.first_value("_count") {
            None => Ok(default_),
            Some(raw) => {
                let n: usize = raw.parse().map_err(|_| {
                    CoreError::invalid_request("_count must be a positive integer")
                })?;
                if n == 0 {
                    return Err(CoreError::invalid_request("_count must be >= 1"));
                }
                Ok(n.min(max))
            }
        }
    }

    /// Effective `_offset`; zero when absent.
    pub fn offset(&self) -> Result<usize> {
        match self.first_value("_offset") {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                CoreError::invalid_request("_offset must be a non-negative integer")
            }),
        }
    }

    /// Continuation token from `_page`, if present.
    pub fn page(&self) -> Option<&str> {
        self.first_value("_page")
    }

    /// `_sort` fields as `(name, descending)` pairs, in order.
    pub fn sort(&self) -> Vec<(String, bool)> {
        let Some(param) = self.first("_sort") else {
            return Vec::new();
        };
        param
            .values
            .iter()
            .map(|v| match v.strip_prefix('-') {
                Some(field) => (field.to_string(), true),
                None => (v.clone(), false),
            })
            .collect()
    }

    pub fn summary(&self) -> Result<Option<SummaryMode>> {
        match self.first_value("_summary") {
            None => Ok(None),
            Some("true") => Ok(Some(SummaryMode::True)),
            Some("text") => Ok(Some(SummaryMode::Text)),
            Some("data") => Ok(Some(SummaryMode::Data)),
            Some("false") => Ok(None),
            Some(other) => Err(CoreError::invalid_request(format!(
                "_summary must be one of true, text, data (got '{other}')"
            ))),
        }
    }

    pub fn total(&self) -> Result<TotalMode> {
        match self.first_value("_total") {
            None => Ok(TotalMode::None),
            Some("none") => Ok(TotalMode::None),
            Some("estimate") => Ok(TotalMode::Estimate),
            Some("accurate") => Ok(TotalMode::Accurate),
            Some(other) => Err(CoreError::invalid_request(format!(
                "_total must be one of none, estimate, accurate (got '{other}')"
            ))),
        }
    }

    /// `_since` bound for history requests.
    pub fn since(&self) -> Option<&str> {
        self.first_value("_since")
    }

    /// Parameters that are search filters (neither result controls nor
    /// include directives). Chained parameters (`name.subname`) included.
    pub fn filters(&self) -> impl Iterator<Item = &ParsedParam> {
        self.params.iter().filter(|p| !p.name.starts_with('_'))
    }

    /// Raw `_include` / `_revinclude` occurrences (value, iterate-flag).
    pub fn includes(&self, reverse: bool) -> Vec<(&str, bool)> {
        let wanted = if reverse { "_revinclude" } else { "_include" };
        self.params
            .iter()
            .filter(|p| p.name == wanted)
            .flat_map(|p| {
                let iterate = p.modifier.as_deref() == Some("iterate");
                p.values.iter().map(move |v| (v.as_str(), iterate))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_names_modifiers_and_comma_values() {
        let parsed = parse_query("name:exact=John&code=a,b,c&_count=10");
        assert_eq!(parsed.params.len(), 3);
        assert_eq!(parsed.params[0].name, "name");
        assert_eq!(parsed.params[0].modifier.as_deref(), Some("exact"));
        assert_eq!(parsed.params[1].values, vec!["a", "b", "c"]);
    }

    #[test]
    fn repeated_params_stay_separate() {
        let parsed = parse_query("date=ge2025-01-05&date=le2025-01-07");
        let dates: Vec<_> = parsed.filters().collect();
        assert_eq!(dates.len(), 2);
    }

    #[test]
    fn count_defaults_and_clamps() {
        assert_eq!(parse_query("").count(50, 500).unwrap(), 50);
        assert_eq!(parse_query("_count=25").count(50, 500).unwrap(), 25);
        assert_eq!(parse_query("_count=9999").count(50, 500).unwrap(), 500);
        assert!(parse_query("_count=0").count(50, 500).is_err());
        assert!(parse_query("_count=abc").count(50, 500).is_err());
    }

    #[test]
    fn offset_parsing() {
        assert_eq!(parse_query("").offset().unwrap(), 0);
        assert_eq!(parse_query("_offset=100").offset().unwrap(), 100);
        assert!(parse_query("_offset=-1").offset().is_err());
    }

    #[test]
    fn sort_directions() {
        let parsed = parse_query("_sort=-_lastUpdated,name");
        assert_eq!(
            parsed.sort(),
            vec![("_lastUpdated".to_string(), true), ("name".to_string(), false)]
        );
    }

    #[test]
    fn summary_and_total_validation() {
        assert_eq!(
            parse_query("_summary=text").summary().unwrap(),
            Some(SummaryMode::Text)
        );
        assert!(parse_query("_summary=bogus").summary().is_err());
        assert_eq!(
            parse_query("_total=accurate").total().unwrap(),
            TotalMode::Accurate
        );
        assert!(parse_query("_total=exact").total().is_err());
    }

    #[test]
    fn include_extraction() {
        let parsed = parse_query(
            "_include=Observation:patient&_revinclude=Observation:subject&_include:iterate=Patient:organization",
        );
        let includes = parsed.includes(false);
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0], ("Observation:patient", false));
        assert_eq!(includes[1], ("Patient:organization", true));
        let revs = parsed.includes(true);
        assert_eq!(revs, vec![("Observation:subject", false)]);
    }

    #[test]
    fn url_decoding() {
        let parsed = parse_query("identifier=http%3A%2F%2Fsys%7CMRN-1");
        assert_eq!(parsed.params[0].values, vec!["http://sys|MRN-1"]);
    }

    #[test]
    fn filters_exclude_underscore_params() {
        let parsed = parse_query("name=x&_count=5&_page=tok");
        let names: Vec<_> = parsed.filters().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name"]);
    }
}
