use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// RFC 3339 UTC timestamp as stamped into `meta.lastUpdated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FhirInstant(pub OffsetDateTime);

impl FhirInstant {
    pub fn new(datetime: OffsetDateTime) -> Self {
        Self(datetime.to_offset(UtcOffset::UTC))
    }

    pub fn inner(&self) -> &OffsetDateTime {
        &self.0
    }

    pub fn unix_timestamp(&self) -> i64 {
        self.0.unix_timestamp()
    }
}

impl fmt::Display for FhirInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = self.0.format(&Rfc3339).map_err(|_| fmt::Error)?;
        write!(f, "{formatted}")
    }
}

impl FromStr for FhirInstant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let datetime = OffsetDateTime::parse(s, &Rfc3339).map_err(|e| {
            CoreError::invalid_request(format!("invalid instant '{s}': {e}"))
        })?;
        Ok(Self::new(datetime))
    }
}

impl Serialize for FhirInstant {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = self.0.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

impl<'de> Deserialize<'de> for FhirInstant {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FhirInstant::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Current time, UTC, for stamping `meta.lastUpdated`.
pub fn now_utc() -> FhirInstant {
    FhirInstant(OffsetDateTime::now_utc())
}

/// The implicit range covered by a (possibly partial) FHIR date literal.
///
/// A search value of `2025` covers the whole year, `2025-01` the whole month,
/// `2025-01-05` the whole day; a full dateTime covers a single instant. Both
/// bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// Parse a FHIR date/dateTime search literal into its implicit range.
///
/// Accepted shapes: `YYYY`, `YYYY-MM`, `YYYY-MM-DD`, and full RFC 3339
/// dateTimes. Anything else is an invalid request.
pub fn parse_date_literal(value: &str) -> Result<DateRange> {
    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        let utc = dt.to_offset(UtcOffset::UTC);
        return Ok(DateRange { start: utc, end: utc });
    }

    let invalid = || CoreError::invalid_request(format!("invalid date value '{value}'"));

    let parts: Vec<&str> = value.split('-').collect();
    let (year, month, day) = match parts.as_slice() {
        [y] => (y.parse::<i32>().map_err(|_| invalid())?, None, None),
        [y, m] => (
            y.parse::<i32>().map_err(|_| invalid())?,
            Some(m.parse::<u8>().map_err(|_| invalid())?),
            None,
        ),
        [y, m, d] => (
            y.parse::<i32>().map_err(|_| invalid())?,
            Some(m.parse::<u8>().map_err(|_| invalid())?),
            Some(d.parse::<u8>().map_err(|_| invalid())?),
        ),
        _ => return Err(invalid()),
    };

    let month_enum = match month {
        Some(m) => Some(Month::try_from(m).map_err(|_| invalid())?),
        None => None,
    };
    let first_month = month_enum.unwrap_or(Month::January);

    let start_date = match day {
        Some(d) => Date::from_calendar_date(year, first_month, d).map_err(|_| invalid())?,
        None => Date::from_calendar_date(year, first_month, 1).map_err(|_| invalid())?,
    };

    let end_date = match (month, day) {
        (_, Some(_)) => start_date,
        (Some(_), None) => {
            let m = first_month;
            let last = time::util::days_in_month(m, year);
            Date::from_calendar_date(year, m, last).map_err(|_| invalid())?
        }
        (None, None) => Date::from_calendar_date(year, Month::December, 31).map_err(|_| invalid())?,
    };

    Ok(DateRange {
        start: PrimitiveDateTime::new(start_date, Time::MIDNIGHT).assume_utc(),
        end: PrimitiveDateTime::new(end_date, Time::from_hms_nano(23, 59, 59, 999_999_999).unwrap())
            .assume_utc(),
    })
}

/// Format a bound as RFC 3339 for embedding into an FTS date-range clause.
pub fn format_rfc3339(dt: OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

/// Parse a stored date or dateTime value leniently (used when evaluating
/// documents whose fields may carry either precision).
pub fn parse_stored_datetime(value: &str) -> Option<OffsetDateTime> {
    parse_date_literal(value).ok().map(|r| r.start)
}
