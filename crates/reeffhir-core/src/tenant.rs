use crate::error::{CoreError, Result};

/// Tenant binding for a single request.
///
/// A request is bound to exactly one tenant (one logical bucket) for its
/// entire lifetime; the context is constructed per request and never shared
/// between concurrent requests. Reading before binding is a well-defined
/// error that the HTTP boundary converts to an invalid-request outcome.
#[derive(Debug, Default, Clone)]
pub struct TenantContext {
    tenant: Option<String>,
}

impl TenantContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the request to a tenant bucket.
    pub fn set(&mut self, tenant: impl Into<String>) {
        self.tenant = Some(tenant.into());
    }

    /// The bucket this request is bound to.
    pub fn get(&self) -> Result<&str> {
        self.tenant.as_deref().ok_or(CoreError::NoTenant)
    }

    /// Construct a context already bound to `tenant`.
    pub fn bound(tenant: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
        }
    }
}
