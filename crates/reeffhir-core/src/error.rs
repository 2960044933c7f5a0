use thiserror::Error;

/// Error taxonomy for the request-execution plane.
///
/// The kinds are orthogonal to transport: the HTTP boundary maps each kind to
/// a status code and a single-issue OperationOutcome. Nothing in the lower
/// layers constructs HTTP responses.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Connectivity-class failure reported by the database gateway. Opens (or
    /// keeps open) the circuit breaker; never retried inside the core.
    #[error("Database unavailable: {reason}")]
    DatabaseUnavailable { reason: String },

    /// Version or id collision inside a transaction. Retried a bounded number
    /// of times by the lifecycle component only.
    #[error("Conflict: {resource_type}/{id}: {message}")]
    Conflict {
        resource_type: String,
        id: String,
        message: String,
    },

    /// Pagination token missing/expired, or resource tombstoned.
    #[error("Gone: {message}")]
    Gone { message: String },

    /// Key absent.
    #[error("Resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// Malformed search parameter, ambiguous reference without a target type,
    /// unknown resource type.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Resource failed profile validation (reported by the external
    /// validator, consumed here as a named kind).
    #[error("Validation failure: {message}")]
    ValidationFailure { message: String },

    /// `TenantContext::get` was called before `set`.
    #[error("No tenant bound to the request")]
    NoTenant,

    /// Any unexpected error. Logged at error level and surfaced as 500.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn database_unavailable(reason: impl Into<String>) -> Self {
        Self::DatabaseUnavailable {
            reason: reason.into(),
        }
    }

    pub fn conflict(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource_type: resource_type.into(),
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::Gone {
            message: message.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn validation_failure(message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for kinds the client caused (4xx at the HTTP boundary).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::Gone { .. }
                | Self::NotFound { .. }
                | Self::InvalidRequest { .. }
                | Self::ValidationFailure { .. }
                | Self::NoTenant
        )
    }

    /// True when a retry of the same request may succeed once the database
    /// recovers.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseUnavailable { .. })
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DatabaseUnavailable { .. } => ErrorCategory::Unavailable,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Gone { .. } => ErrorCategory::Gone,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidRequest { .. } | Self::NoTenant => ErrorCategory::Invalid,
            Self::ValidationFailure { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::internal(format!("JSON error: {err}"))
    }
}

/// Error categories for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Unavailable,
    Conflict,
    Gone,
    NotFound,
    Invalid,
    Validation,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Conflict => write!(f, "conflict"),
            Self::Gone => write!(f, "gone"),
            Self::NotFound => write!(f, "not_found"),
            Self::Invalid => write!(f, "invalid"),
            Self::Validation => write!(f, "validation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = CoreError::not_found("Patient", "123");
        assert_eq!(err.to_string(), "Resource not found: Patient/123");

        let err = CoreError::database_unavailable("circuit open");
        assert_eq!(err.to_string(), "Database unavailable: circuit open");

        let err = CoreError::conflict("Patient", "123", "id already exists");
        assert!(err.to_string().contains("Patient/123"));
    }

    #[test]
    fn client_vs_transient_classification() {
        assert!(CoreError::invalid_request("bad param").is_client_error());
        assert!(CoreError::not_found("Patient", "x").is_client_error());
        assert!(CoreError::gone("expired").is_client_error());
        assert!(CoreError::NoTenant.is_client_error());

        assert!(!CoreError::database_unavailable("down").is_client_error());
        assert!(CoreError::database_unavailable("down").is_transient());
        assert!(!CoreError::internal("boom").is_transient());
    }

    #[test]
    fn categories() {
        assert_eq!(
            CoreError::database_unavailable("x").category(),
            ErrorCategory::Unavailable
        );
        assert_eq!(
            CoreError::conflict("Patient", "1", "x").category(),
            ErrorCategory::Conflict
        );
        assert_eq!(CoreError::gone("x").category(), ErrorCategory::Gone);
        assert_eq!(
            CoreError::not_found("Patient", "1").category(),
            ErrorCategory::NotFound
        );
        assert_eq!(CoreError::NoTenant.category(), ErrorCategory::Invalid);
        assert_eq!(
            CoreError::validation_failure("x").category(),
            ErrorCategory::Validation
        );
        assert_eq!(CoreError::internal("x").category(), ErrorCategory::Internal);
    }

    #[test]
    fn json_errors_map_to_internal() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(matches!(err, CoreError::Internal { .. }));
    }

    #[test]
    fn category_display() {
        assert_eq!(ErrorCategory::Unavailable.to_string(), "unavailable");
        assert_eq!(ErrorCategory::NotFound.to_string(), "not_found");
        assert_eq!(ErrorCategory::Gone.to_string(), "gone");
    }
}
