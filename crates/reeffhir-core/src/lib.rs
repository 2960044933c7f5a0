//! Core types for the ReefFHIR request-execution plane: the error taxonomy,
//! tenant binding, collection routing, document keys, timestamps, and request
//! identifiers shared by every other crate in the workspace.

pub mod error;
pub mod json;
pub mod key;
pub mod reqid;
pub mod router;
pub mod tenant;
pub mod time;

pub use error::{CoreError, ErrorCategory, Result};
pub use key::{parse_resource_key, resource_key, version_key};
pub use reqid::RequestId;
pub use router::CollectionRouter;
pub use tenant::TenantContext;
pub use time::{FhirInstant, now_utc};
