//! Tenant context guard.
//!
//! The per-request tenant scope is an explicit value built once from
//! verified access-token claims and threaded through every storage call,
//! never process-global state. Store implementations re-check every row
//! they touch against it (`ensure_tenant`) in addition to the storage
//! layer's row isolation.

use uuid::Uuid;

use crate::services::{AccessClaims, CoreError};

/// Well-known tenant id used in on-premise single-tenant deployments.
pub const ON_PREMISE_TENANT_ID: Uuid = Uuid::from_u128(1);

/// Per-request tenant scope derived from an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub branch_id: Option<Uuid>,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, user_id: Uuid, branch_id: Option<Uuid>) -> Self {
        Self {
            tenant_id,
            user_id,
            branch_id,
        }
    }

    /// Context for on-premise single-tenant mode; enforcement is identical,
    /// only the tenant id is fixed.
    pub fn on_premise(user_id: Uuid, branch_id: Option<Uuid>) -> Self {
        Self::new(ON_PREMISE_TENANT_ID, user_id, branch_id)
    }

    /// Build a context from verified access-token claims.
    pub fn from_claims(claims: &AccessClaims) -> Result<Self, CoreError> {
        let tenant_id = Uuid::parse_str(&claims.tid).map_err(|_| CoreError::TokenInvalidSignature)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| CoreError::TokenInvalidSignature)?;
        let branch_id = match &claims.bid {
            Some(bid) => {
                Some(Uuid::parse_str(bid).map_err(|_| CoreError::TokenInvalidSignature)?)
            }
            None => None,
        };
        Ok(Self::new(tenant_id, user_id, branch_id))
    }

    /// Check a resource's own tenant id against the established scope.
    ///
    /// A mismatch means the storage-layer isolation failed or a caller
    /// crossed scopes; fail closed and log it as a possible integrity bug.
    pub fn ensure_tenant(&self, resource_tenant_id: Uuid) -> Result<(), CoreError> {
        if resource_tenant_id == self.tenant_id {
            Ok(())
        } else {
            tracing::error!(
                context_tenant = %self.tenant_id,
                resource_tenant = %resource_tenant_id,
                user_id = %self.user_id,
                "Tenant mismatch: resource outside established scope"
            );
            Err(CoreError::TenantMismatch)
        }
    }
}
