//! Role assignment model - time-bounded user→role bindings, optionally
//! scoped to one branch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role assignment entity. `branch_id` NULL means tenant-wide.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoleAssignment {
    pub assignment_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl RoleAssignment {
    /// Create a new assignment starting now, open-ended.
    pub fn new(tenant_id: Uuid, user_id: Uuid, role_id: Uuid, branch_id: Option<Uuid>) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            role_id,
            branch_id,
            valid_from: Utc::now(),
            valid_until: None,
        }
    }

    /// Check if the validity window contains now.
    pub fn is_active(&self) -> bool {
        let now = Utc::now();
        self.valid_from <= now && self.valid_until.is_none_or(|until| until > now)
    }

    /// Check if the assignment applies when acting in `branch_id`.
    ///
    /// A tenant-wide assignment (NULL branch) applies everywhere; a
    /// branch-scoped one only to that exact branch.
    pub fn applies_to_branch(&self, branch_id: Option<Uuid>) -> bool {
        match self.branch_id {
            None => true,
            Some(assigned) => branch_id == Some(assigned),
        }
    }
}
