//! Role and permission models.
//!
//! Roles form a forest via `parent_role_id`; a role implicitly holds every
//! permission of its ancestors. Permissions are an immutable catalogue of
//! `module:resource:action` keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role entity. `tenant_id` is NULL for global system roles, which are
/// non-editable.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub role_label: String,
    pub parent_role_id: Option<Uuid>,
    pub is_system: bool,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    /// Create a new tenant-scoped role.
    pub fn new(tenant_id: Uuid, role_label: String, parent_role_id: Option<Uuid>) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id: Some(tenant_id),
            role_label,
            parent_role_id,
            is_system: false,
            created_utc: Utc::now(),
        }
    }

    /// Create a global system role (non-editable).
    pub fn new_system(role_label: String, parent_role_id: Option<Uuid>) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id: None,
            role_label,
            parent_role_id,
            is_system: true,
            created_utc: Utc::now(),
        }
    }
}

/// Permission catalogue entry, keyed as `module:resource:action`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub perm_id: Uuid,
    pub perm_key: String,
}

impl Permission {
    pub fn new(perm_key: String) -> Self {
        Self {
            perm_id: Uuid::new_v4(),
            perm_key,
        }
    }
}

/// Role to permission mapping edge.
#[derive(Debug, Clone, FromRow)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub perm_id: Uuid,
}
