use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Permission, Role, RoleAssignment};
use crate::services::CoreError;
use crate::store::AuthStore;
use crate::tenant::TenantContext;

/// Upper bound on role inheritance chains. Anything deeper is treated as a
/// data integrity fault, not a legitimate hierarchy.
pub const MAX_ROLE_DEPTH: usize = 16;

/// How many times an authorization read is retried before denying.
const AUTHORIZE_READ_ATTEMPTS: u32 = 2;

/// Resolves effective permissions from role assignments, walking the role
/// inheritance graph.
///
/// Permission checks fail closed: store errors, unknown roles and broken
/// inheritance chains all result in a denial, never a grant.
#[derive(Clone)]
pub struct RbacResolver {
    store: Arc<dyn AuthStore>,
}

/// A role whose parent chain never terminates within [`MAX_ROLE_DEPTH`].
#[derive(Debug)]
struct RoleChainFault {
    role_id: Uuid,
}

impl RbacResolver {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Check whether the user in `ctx` holds `perm_key`, directly or through
    /// an ancestor role. Store failures are retried once, then denied.
    pub async fn authorize(&self, ctx: &TenantContext, perm_key: &str) -> bool {
        for attempt in 1..=AUTHORIZE_READ_ATTEMPTS {
            match self.effective_permissions(ctx).await {
                Ok(keys) => return keys.iter().any(|k| k == perm_key),
                Err(err) if err.is_retryable() && attempt < AUTHORIZE_READ_ATTEMPTS => {
                    tracing::warn!(error = %err, attempt, "authorization read failed, retrying");
                }
                Err(err) => {
                    tracing::error!(
                        error = %err,
                        user_id = %ctx.user_id,
                        perm_key,
                        "authorization read failed, denying"
                    );
                    return false;
                }
            }
        }
        false
    }

    /// Every permission key the user holds in this tenant and branch scope.
    pub async fn effective_permissions(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<String>, CoreError> {
        let assignments = self
            .store
            .find_active_assignments(ctx, ctx.user_id, ctx.branch_id)
            .await?;
        if assignments.is_empty() {
            return Ok(Vec::new());
        }

        let roles = self.store.load_roles(ctx).await?;
        let arena: HashMap<Uuid, Role> =
            roles.into_iter().map(|r| (r.role_id, r)).collect();
        let direct: Vec<Uuid> = assignments.iter().map(|a| a.role_id).collect();

        let expanded = match collect_with_ancestors(&arena, &direct) {
            Ok(set) => set,
            Err(fault) => {
                tracing::error!(
                    role_id = %fault.role_id,
                    tenant_id = %ctx.tenant_id,
                    "role inheritance chain exceeds depth bound, denying all"
                );
                return Ok(Vec::new());
            }
        };

        let role_ids: Vec<Uuid> = expanded.into_iter().collect();
        self.store.load_role_permission_keys(&role_ids).await
    }

    /// Labels of the user's directly assigned roles, for token claims.
    pub async fn role_labels(&self, ctx: &TenantContext) -> Result<Vec<String>, CoreError> {
        let assignments = self
            .store
            .find_active_assignments(ctx, ctx.user_id, ctx.branch_id)
            .await?;
        let roles = self.store.load_roles(ctx).await?;
        let arena: HashMap<Uuid, &Role> = roles.iter().map(|r| (r.role_id, r)).collect();

        let mut labels: Vec<String> = assignments
            .iter()
            .filter_map(|a| arena.get(&a.role_id).map(|r| r.role_label.clone()))
            .collect();
        labels.sort();
        labels.dedup();
        Ok(labels)
    }

    /// Create a tenant-owned role, optionally inheriting from a parent
    /// belonging to the same tenant or to the system catalogue.
    pub async fn create_role(
        &self,
        ctx: &TenantContext,
        label: &str,
        parent_role_id: Option<Uuid>,
    ) -> Result<Role, CoreError> {
        if let Some(parent_id) = parent_role_id {
            let parent = self
                .store
                .find_role(parent_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("parent role {} not found", parent_id))?;
            if let Some(parent_tenant) = parent.tenant_id {
                ctx.ensure_tenant(parent_tenant)?;
            }
        }
        let role = Role::new(ctx.tenant_id, label.to_string(), parent_role_id);
        self.store.insert_role(&role).await?;
        Ok(role)
    }

    /// Grant a permission to a role. A trailing `*` segment is expanded
    /// against the permission catalogue at grant time; later additions to
    /// the catalogue are not granted retroactively.
    pub async fn grant_permission(
        &self,
        ctx: &TenantContext,
        role_id: Uuid,
        perm_pattern: &str,
    ) -> Result<usize, CoreError> {
        let role = self
            .store
            .find_role(role_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("role {} not found", role_id))?;
        if role.is_system {
            return Err(CoreError::InsufficientPermission);
        }
        if let Some(role_tenant) = role.tenant_id {
            ctx.ensure_tenant(role_tenant)?;
        }

        let catalogue = self.store.load_permission_catalogue().await?;
        let matched: Vec<&Permission> = catalogue
            .iter()
            .filter(|p| wildcard_matches(perm_pattern, &p.perm_key))
            .collect();
        if matched.is_empty() {
            return Err(anyhow::anyhow!(
                "pattern {:?} matches no known permission",
                perm_pattern
            )
            .into());
        }

        let perm_ids: Vec<Uuid> = matched.iter().map(|p| p.perm_id).collect();
        self.store.grant_role_permissions(role_id, &perm_ids).await?;
        tracing::info!(
            role_id = %role_id,
            pattern = perm_pattern,
            granted = perm_ids.len(),
            "permissions granted to role"
        );
        Ok(perm_ids.len())
    }

    /// Assign a role to a user, optionally branch-scoped and time-bounded.
    pub async fn assign_role(
        &self,
        ctx: &TenantContext,
        user_id: Uuid,
        role_id: Uuid,
        branch_id: Option<Uuid>,
        valid_until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<RoleAssignment, CoreError> {
        let role = self
            .store
            .find_role(role_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("role {} not found", role_id))?;
        if let Some(role_tenant) = role.tenant_id {
            ctx.ensure_tenant(role_tenant)?;
        }

        let mut assignment = RoleAssignment::new(ctx.tenant_id, user_id, role_id, branch_id);
        assignment.valid_until = valid_until;
        self.store.insert_assignment(&assignment).await?;
        Ok(assignment)
    }

    /// End an assignment now. Expired or already-ended assignments simply
    /// stop matching; nothing is deleted.
    pub async fn end_assignment(
        &self,
        ctx: &TenantContext,
        assignment_id: Uuid,
    ) -> Result<(), CoreError> {
        self.store.end_assignment(ctx, assignment_id).await
    }
}

/// Expand a set of role ids to include every ancestor, deduplicated.
///
/// Each parent chain is bounded by [`MAX_ROLE_DEPTH`]; a chain that has not
/// terminated by then (a cycle, with single-parent roles) is a fault.
fn collect_with_ancestors(
    arena: &HashMap<Uuid, Role>,
    start: &[Uuid],
) -> Result<HashSet<Uuid>, RoleChainFault> {
    let mut collected: HashSet<Uuid> = HashSet::new();

    for &root in start {
        let mut cursor = Some(root);
        let mut depth = 0usize;
        while let Some(role_id) = cursor {
            // A parent id with no row in the arena ends the chain; only
            // real roles are collected or counted against the bound.
            let Some(role) = arena.get(&role_id) else {
                break;
            };
            if !collected.insert(role_id) {
                break; // already walked this chain from here up
            }
            depth += 1;
            if depth > MAX_ROLE_DEPTH {
                return Err(RoleChainFault { role_id });
            }
            cursor = role.parent_role_id;
        }
    }
    Ok(collected)
}

/// Match a `module:resource:action` key against a pattern where `*` stands
/// for a whole segment. `reports:*:*` matches `reports:grades:view`;
/// segment counts must agree, so `reports:*` never matches a 3-part key.
fn wildcard_matches(pattern: &str, perm_key: &str) -> bool {
    let mut pattern_parts = pattern.split(':');
    let mut key_parts = perm_key.split(':');
    loop {
        match (pattern_parts.next(), key_parts.next()) {
            (None, None) => return true,
            (Some(p), Some(k)) if p == "*" || p == k => continue,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn role(tenant: Uuid, parent: Option<Uuid>) -> Role {
        Role::new(tenant, "r".to_string(), parent)
    }

    #[test]
    fn ancestor_walk_collects_the_full_chain() {
        let tenant = Uuid::new_v4();
        let grandparent = role(tenant, None);
        let parent = role(tenant, Some(grandparent.role_id));
        let child = role(tenant, Some(parent.role_id));
        let arena: HashMap<Uuid, Role> = [&grandparent, &parent, &child]
            .iter()
            .map(|r| (r.role_id, (*r).clone()))
            .collect();

        let set = collect_with_ancestors(&arena, &[child.role_id]).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&grandparent.role_id));
    }

    #[test]
    fn self_referencing_role_is_a_fault_not_a_hang() {
        let tenant = Uuid::new_v4();
        let mut looped = role(tenant, None);
        looped.parent_role_id = Some(looped.role_id);
        // A self-parent is caught by the dedup set on the second visit, so
        // build a two-node loop to exercise the depth bound as well.
        let mut a = role(tenant, None);
        let mut b = role(tenant, Some(a.role_id));
        a.parent_role_id = Some(b.role_id);
        b.parent_role_id = Some(a.role_id);

        let arena: HashMap<Uuid, Role> = [&looped, &a, &b]
            .iter()
            .map(|r| (r.role_id, (*r).clone()))
            .collect();

        // Dedup terminates both loops without exceeding the depth bound.
        let set = collect_with_ancestors(&arena, &[looped.role_id, a.role_id]).unwrap();
        assert!(set.contains(&looped.role_id));
        assert!(set.contains(&a.role_id) && set.contains(&b.role_id));
    }

    #[test]
    fn missing_parent_ends_the_chain() {
        let tenant = Uuid::new_v4();
        let child = role(tenant, Some(Uuid::new_v4()));
        let arena: HashMap<Uuid, Role> = [(child.role_id, child.clone())].into();

        let set = collect_with_ancestors(&arena, &[child.role_id]).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn wildcard_matches_whole_segments_only() {
        assert!(wildcard_matches("reports:*:*", "reports:grades:view"));
        assert!(wildcard_matches("reports:grades:*", "reports:grades:export"));
        assert!(wildcard_matches("*:*:*", "anything:at:all"));
        assert!(wildcard_matches("grades:entry:edit", "grades:entry:edit"));
        assert!(!wildcard_matches("reports:*", "reports:grades:view"));
        assert!(!wildcard_matches("reports:*:*", "reporting:grades:view"));
        assert!(!wildcard_matches("grades:entry:edit", "grades:entry:view"));
    }

    proptest! {
        #[test]
        fn ancestor_walk_always_terminates(parent_links in proptest::collection::vec(0usize..20, 1..20)) {
            // Build an arbitrary parent graph over n roles, cycles included.
            let ids: Vec<Uuid> = (0..parent_links.len()).map(|_| Uuid::new_v4()).collect();
            let mut arena = HashMap::new();
            for (i, &p) in parent_links.iter().enumerate() {
                let mut r = role(Uuid::new_v4(), None);
                r.role_id = ids[i];
                r.parent_role_id = if p < ids.len() { Some(ids[p]) } else { None };
                arena.insert(ids[i], r);
            }

            if let Ok(set) = collect_with_ancestors(&arena, &ids) {
                // Never invents roles and never misses a start node.
                prop_assert!(set.len() <= arena.len());
                for id in &ids {
                    prop_assert!(set.contains(id));
                }
            }
        }

        #[test]
        fn ancestor_walk_equals_transitive_closure_on_forests(
            parents in proptest::collection::vec(proptest::option::of(0usize..15), 1..15),
            starts in proptest::collection::vec(0usize..15, 1..5),
        ) {
            // Parent index < own index keeps the graph an acyclic forest
            // shallower than the depth cap.
            let ids: Vec<Uuid> = (0..parents.len()).map(|_| Uuid::new_v4()).collect();
            let mut arena = HashMap::new();
            for (i, p) in parents.iter().enumerate() {
                let mut r = role(Uuid::new_v4(), None);
                r.role_id = ids[i];
                r.parent_role_id = p.filter(|&j| j < i).map(|j| ids[j]);
                arena.insert(ids[i], r);
            }
            let start_ids: Vec<Uuid> =
                starts.iter().filter(|&&s| s < ids.len()).map(|&s| ids[s]).collect();

            let set = collect_with_ancestors(&arena, &start_ids).unwrap();

            // Naive closure by repeated parent hops.
            let mut expected = HashSet::new();
            for &s in &start_ids {
                let mut cursor = Some(s);
                while let Some(id) = cursor {
                    expected.insert(id);
                    cursor = arena.get(&id).and_then(|r| r.parent_role_id);
                }
            }
            prop_assert_eq!(set, expected);
        }
    }
}
