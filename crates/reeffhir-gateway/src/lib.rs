//! Database gateway for the ReefFHIR server.
//!
//! Defines the [`DocumentCluster`] backend contract (KV / N1QL / FTS /
//! transactions), the FTS request model, and the circuit-breaker-protected
//! [`DbGateway`] every other component calls instead of the cluster.

pub mod breaker;
pub mod error;
pub mod fts;
pub mod gateway;
pub mod traits;

pub use breaker::{Admission, CircuitBreaker};
pub use error::ClusterError;
pub use fts::{QueryNode, SearchHits, SearchRequest, SortSpec};
pub use gateway::{CollectionHandle, DbGateway};
pub use traits::{CollectionRef, DocumentCluster, DocumentTransaction};
