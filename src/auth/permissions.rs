use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value as Json};
use tracing::trace;

use crate::auth::AuthContext;
use crate::model::permission::normalize_role;
use crate::model::{Permission, PermissionType, Value};
use crate::query::attributes::{COL_PERMISSIONS, COL_TENANT, COL_UID};
use crate::query::{Binds, SqlDialect};
use crate::types::Result;

/// Outcome of [`restrict`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Restriction {
    /// Authorization is disabled for the context; nothing is filtered.
    Unrestricted,
    /// Only documents granting `kind` to one of `roles` are visible.
    Roles {
        /// Permission type required.
        kind: PermissionType,
        /// Normalized, de-duplicated roles in caller order.
        roles: Vec<String>,
    },
}

/// Builds the restriction for `kind` from the caller's context. Roles are
/// normalized; a malformed role is `InvalidQuery`.
pub fn restrict(ctx: &AuthContext, kind: PermissionType) -> Result<Restriction> {
    if !ctx.authorization_enabled() {
        trace!(permission = %kind, "authorization disabled, no permission filter");
        return Ok(Restriction::Unrestricted);
    }
    let mut roles: Vec<String> = Vec::with_capacity(ctx.roles().len());
    for role in ctx.roles() {
        let role = normalize_role(role)?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    Ok(Restriction::Roles { kind, roles })
}

impl Restriction {
    /// Whether the restriction filters anything.
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Restriction::Unrestricted)
    }

    /// Whether a document carrying `permissions` passes.
    pub fn allows(&self, permissions: &[Permission]) -> bool {
        match self {
            Restriction::Unrestricted => true,
            Restriction::Roles { kind, roles } => permissions
                .iter()
                .any(|p| p.kind() == *kind && roles.iter().any(|r| r == p.role())),
        }
    }

    /// SQL predicate over the side permission table.
    ///
    /// `perms_table` is the quoted side table, `alias` the quoted alias of the
    /// document table. Under shared tables the permission row's tenant must
    /// match the document's.
    pub fn to_sql(
        &self,
        dialect: SqlDialect,
        perms_table: &str,
        alias: &str,
        shared_tables: bool,
        binds: &mut Binds,
    ) -> Option<String> {
        let (kind, roles) = match self {
            Restriction::Unrestricted => return None,
            Restriction::Roles { kind, roles } => (kind, roles),
        };
        if roles.is_empty() {
            return Some("1 = 0".to_string());
        }
        let perm_col = |c: &str| format!("{}.{}", dialect.quote("perm"), dialect.quote(c));
        let list = roles
            .iter()
            .map(|r| binds.push(Value::String(r.clone())))
            .collect::<Vec<_>>()
            .join(", ");
        let kind = binds.push(Value::String(kind.as_str().to_string()));
        let mut sql = format!(
            "EXISTS (SELECT 1 FROM {perms_table} AS {} WHERE {} = {alias}.{} AND {} = {kind} AND {} IN ({list})",
            dialect.quote("perm"),
            perm_col("_document"),
            dialect.quote(COL_UID),
            perm_col("_type"),
            perm_col("_permission"),
        );
        if shared_tables {
            sql.push_str(" AND ");
            sql.push_str(&dialect.null_safe_eq(
                &perm_col(COL_TENANT),
                &format!("{alias}.{}", dialect.quote(COL_TENANT)),
            ));
        }
        sql.push(')');
        Some(sql)
    }

    /// Document-store filter over the `_permissions` array field, matching
    /// the exact wire strings.
    pub fn to_filter(&self) -> Option<Json> {
        match self {
            Restriction::Unrestricted => None,
            Restriction::Roles { kind, roles } => {
                let wire: Vec<String> = roles
                    .iter()
                    .map(|role| format!("{kind}(\"{role}\")"))
                    .collect();
                Some(json!({ COL_PERMISSIONS: { "$in": wire } }))
            }
        }
    }
}

/// Per-type role changes between two permission lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionDelta {
    /// Roles newly granted, per type.
    pub added: BTreeMap<PermissionType, Vec<String>>,
    /// Roles revoked, per type.
    pub removed: BTreeMap<PermissionType, Vec<String>>,
}

impl PermissionDelta {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Added entries as `(type, role)` pairs.
    pub fn added_pairs(&self) -> impl Iterator<Item = (PermissionType, &str)> {
        flatten(&self.added)
    }

    /// Removed entries as `(type, role)` pairs.
    pub fn removed_pairs(&self) -> impl Iterator<Item = (PermissionType, &str)> {
        flatten(&self.removed)
    }
}

fn flatten(
    map: &BTreeMap<PermissionType, Vec<String>>,
) -> impl Iterator<Item = (PermissionType, &str)> {
    map.iter()
        .flat_map(|(kind, roles)| roles.iter().map(move |r| (*kind, r.as_str())))
}

/// Set difference per permission type, in both directions. Role order in
/// each bucket follows the list the role came from.
pub fn diff(old: &[Permission], new: &[Permission]) -> PermissionDelta {
    let mut delta = PermissionDelta::default();
    for kind in PermissionType::ALL {
        let before = roles_of(old, kind);
        let after = roles_of(new, kind);
        let before_set: BTreeSet<&str> = before.iter().copied().collect();
        let after_set: BTreeSet<&str> = after.iter().copied().collect();

        let added: Vec<String> = after
            .iter()
            .filter(|r| !before_set.contains(*r))
            .map(|r| r.to_string())
            .collect();
        let removed: Vec<String> = before
            .iter()
            .filter(|r| !after_set.contains(*r))
            .map(|r| r.to_string())
            .collect();
        if !added.is_empty() {
            delta.added.insert(kind, added);
        }
        if !removed.is_empty() {
            delta.removed.insert(kind, removed);
        }
    }
    delta
}

fn roles_of(permissions: &[Permission], kind: PermissionType) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for p in permissions.iter().filter(|p| p.kind() == kind) {
        if !out.contains(&p.role()) {
            out.push(p.role());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn perms(list: &[&str]) -> Vec<Permission> {
        list.iter().map(|p| Permission::parse(p).unwrap()).collect()
    }

    #[test]
    fn disabled_authorization_is_a_tautology() {
        let ctx = AuthContext::new(["user:1"]).skip_authorization();
        let restriction = restrict(&ctx, PermissionType::Read).unwrap();
        assert!(restriction.is_unrestricted());
        assert!(restriction.allows(&[]));
        let mut binds = Binds::new(SqlDialect::Sqlite);
        assert!(restriction
            .to_sql(SqlDialect::Sqlite, "\"p\"", "\"main\"", false, &mut binds)
            .is_none());
        assert!(restriction.to_filter().is_none());
    }

    #[test]
    fn exact_role_matching() {
        let ctx = AuthContext::new([" \"user:1\" "]);
        let restriction = restrict(&ctx, PermissionType::Read).unwrap();
        assert!(restriction.allows(&perms(&["read(\"user:1\")"])));
        assert!(!restriction.allows(&perms(&["read(\"user:2\")"])));
        assert!(!restriction.allows(&perms(&["read(\"user:10\")"])));
        assert!(!restriction.allows(&perms(&["update(\"user:1\")"])));
    }

    #[test]
    fn malformed_roles_fail_fast() {
        let ctx = AuthContext::new(["user(1)"]);
        let err = restrict(&ctx, PermissionType::Read).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }

    #[test]
    fn sql_subselect_binds_roles_and_type() {
        let ctx = AuthContext::new(["user:1", "any", "any"]);
        let restriction = restrict(&ctx, PermissionType::Read).unwrap();
        let mut binds = Binds::new(SqlDialect::Sqlite);
        let sql = restriction
            .to_sql(SqlDialect::Sqlite, "\"app_movies_perms\"", "\"main\"", true, &mut binds)
            .unwrap();
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"app_movies_perms\" AS \"perm\" WHERE \"perm\".\"_document\" = \"main\".\"_uid\" \
             AND \"perm\".\"_type\" = ?3 AND \"perm\".\"_permission\" IN (?1, ?2) \
             AND \"perm\".\"_tenant\" IS \"main\".\"_tenant\")"
        );
        assert_eq!(
            binds.values(),
            &[Value::from("user:1"), Value::from("any"), Value::from("read")]
        );
    }

    #[test]
    fn empty_role_set_matches_nothing() {
        let restriction = restrict(&AuthContext::new(Vec::<String>::new()), PermissionType::Read).unwrap();
        let mut binds = Binds::new(SqlDialect::Sqlite);
        assert_eq!(
            restriction
                .to_sql(SqlDialect::Sqlite, "\"p\"", "\"main\"", false, &mut binds)
                .as_deref(),
            Some("1 = 0")
        );
        assert_eq!(
            restriction.to_filter().unwrap(),
            json!({"_permissions": {"$in": []}})
        );
    }

    #[test]
    fn filter_uses_wire_strings() {
        let restriction = restrict(&AuthContext::new(["user:1"]), PermissionType::Delete).unwrap();
        assert_eq!(
            restriction.to_filter().unwrap(),
            json!({"_permissions": {"$in": ["delete(\"user:1\")"]}})
        );
    }

    #[test]
    fn diff_reports_both_directions_per_type() {
        let old = perms(&["read(any)", "read(user:1)", "update(user:1)"]);
        let new = perms(&["read(any)", "read(user:2)", "delete(user:1)"]);
        let delta = diff(&old, &new);
        assert_eq!(delta.added[&PermissionType::Read], vec!["user:2"]);
        assert_eq!(delta.added[&PermissionType::Delete], vec!["user:1"]);
        assert_eq!(delta.removed[&PermissionType::Read], vec!["user:1"]);
        assert_eq!(delta.removed[&PermissionType::Update], vec!["user:1"]);
        assert!(!delta.added.contains_key(&PermissionType::Update));
        assert_eq!(delta.added_pairs().count(), 2);
        assert!(diff(&old, &old).is_empty());
    }
}
