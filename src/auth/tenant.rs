use std::collections::BTreeSet;

use tracing::debug;

use crate::auth::AuthContext;
use crate::model::document::ATTR_TENANT;
use crate::model::{Document, Query};
use crate::types::{DbError, Result};

/// Shared-table tenant isolation for one adapter.
///
/// With shared tables off every method is the identity. With them on, every
/// read gains a tenant predicate and every write is stamped with a tenant; a
/// context without a tenant is refused rather than left unscoped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TenantScope {
    shared_tables: bool,
    per_document: bool,
}

impl TenantScope {
    /// Scope for the given mode. `per_document` lets writes keep a tenant
    /// already set on the document.
    pub fn new(shared_tables: bool, per_document: bool) -> Self {
        Self {
            shared_tables,
            per_document,
        }
    }

    /// Whether tenants share physical tables.
    pub fn is_shared(&self) -> bool {
        self.shared_tables
    }

    /// Whether documents may carry their own tenant.
    pub fn is_per_document(&self) -> bool {
        self.shared_tables && self.per_document
    }

    /// Active tenant, required under shared tables.
    pub fn require(&self, ctx: &AuthContext) -> Result<Option<i64>> {
        if !self.shared_tables {
            return Ok(None);
        }
        ctx.tenant().map(Some).ok_or_else(|| {
            DbError::invalid_query("shared tables are enabled but no tenant is set")
        })
    }

    /// Tenant predicate for reads. The metadata collection also accepts
    /// documents without a tenant.
    pub fn filter(&self, ctx: &AuthContext, is_metadata: bool) -> Result<Option<Query>> {
        let Some(tenant) = self.require(ctx)? else {
            return Ok(None);
        };
        Ok(Some(with_null_tenant(
            Query::equal(ATTR_TENANT, vec![tenant]),
            is_metadata,
        )))
    }

    /// `queries` with the tenant predicate appended.
    pub fn scope(&self, ctx: &AuthContext, queries: &[Query], is_metadata: bool) -> Result<Vec<Query>> {
        let mut scoped = queries.to_vec();
        if let Some(filter) = self.filter(ctx, is_metadata)? {
            scoped.push(filter);
        }
        Ok(scoped)
    }

    /// Tenant predicate for a batch lookup over documents whose tenants are
    /// `tenants`. Several distinct tenants become one membership test, a
    /// single tenant a scalar equality.
    pub fn batch_filter(
        &self,
        ctx: &AuthContext,
        tenants: &[Option<i64>],
        is_metadata: bool,
    ) -> Result<Option<Query>> {
        if !self.is_per_document() || tenants.iter().all(Option::is_none) {
            return self.filter(ctx, is_metadata);
        }
        let mut distinct = BTreeSet::new();
        for tenant in tenants {
            match tenant {
                Some(t) => {
                    distinct.insert(*t);
                }
                None => {
                    if let Some(t) = self.require(ctx)? {
                        distinct.insert(t);
                    }
                }
            }
        }
        let values: Vec<i64> = distinct.into_iter().collect();
        Ok(Some(with_null_tenant(
            Query::equal(ATTR_TENANT, values),
            is_metadata,
        )))
    }

    /// Sets the tenant of a document about to be written.
    pub fn stamp(&self, ctx: &AuthContext, document: &mut Document) -> Result<()> {
        if !self.shared_tables {
            return Ok(());
        }
        if self.per_document && document.tenant.is_some() {
            return Ok(());
        }
        let tenant = self.require(ctx)?;
        if document.tenant.is_some() && document.tenant != tenant {
            debug!(
                document = %document.id,
                from = ?document.tenant,
                to = ?tenant,
                "overriding document tenant with active tenant"
            );
        }
        document.tenant = tenant;
        Ok(())
    }
}

fn with_null_tenant(query: Query, is_metadata: bool) -> Query {
    if is_metadata {
        Query::or(vec![query, Query::is_null(ATTR_TENANT)])
    } else {
        query
    }
}
