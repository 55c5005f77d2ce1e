//! Branch model - a sub-scope (campus/location) within a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Branch entity. Branch-scoped rows reference it with a nullable
/// `branch_id`; NULL means "all branches of the tenant".
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Branch {
    pub branch_id: Uuid,
    pub tenant_id: Uuid,
    pub branch_label: String,
    pub created_utc: DateTime<Utc>,
}

impl Branch {
    pub fn new(tenant_id: Uuid, branch_label: String) -> Self {
        Self {
            branch_id: Uuid::new_v4(),
            tenant_id,
            branch_label,
            created_utc: Utc::now(),
        }
    }
}
