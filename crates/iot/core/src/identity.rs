//! Caller identity.

/// The tenant on whose behalf an operation runs.
///
/// This is the only request-scoped value carried into detached work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Identity {
    /// Tenant ID. Empty for single-tenant deployments.
    pub tenant: String,
}

impl Identity {
    /// Create an identity for a tenant.
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tenant)
    }
}
