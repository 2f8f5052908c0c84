//! Caller identity threaded through every adapter call.
//!
//! There is no ambient "current roles" state anywhere in the crate: each
//! operation receives an [`AuthContext`] and derives its permission and tenant
//! predicates from it.

use tracing::info;

/// Row/document-level permission filter and permission deltas.
pub mod permissions;
/// Shared-table tenant isolation.
pub mod tenant;

pub use permissions::{diff, restrict, PermissionDelta, Restriction};
pub use tenant::TenantScope;

/// Roles, authorization switch and active tenant of one caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    roles: Vec<String>,
    authorization: bool,
    tenant: Option<i64>,
}

impl AuthContext {
    /// Context for a caller holding `roles`, with authorization enforced.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            authorization: true,
            tenant: None,
        }
    }

    /// Internal, unfiltered access. Every use is logged.
    pub fn privileged() -> Self {
        info!("privileged auth context created; permission filtering disabled");
        Self {
            roles: Vec::new(),
            authorization: false,
            tenant: None,
        }
    }

    /// Sets the active tenant.
    pub fn with_tenant(mut self, tenant: Option<i64>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Disables permission filtering for this context. Logged.
    pub fn skip_authorization(mut self) -> Self {
        info!(roles = ?self.roles, "authorization skipped for context");
        self.authorization = false;
        self
    }

    /// Active roles, in caller order.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Whether permission filtering is enforced.
    pub fn authorization_enabled(&self) -> bool {
        self.authorization
    }

    /// Active tenant.
    pub fn tenant(&self) -> Option<i64> {
        self.tenant
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new(["any"])
    }
}
