//! Domain models for the authorization and session core.
//!
//! All tenant-scoped entities carry a `tenant_id`; row-level isolation is
//! enforced by the storage layer (see `migrations/`) and re-checked by the
//! tenant context guard.

mod assignment;
mod branch;
mod lockout;
mod otp_challenge;
mod refresh_session;
mod role;
mod tenant;
mod two_factor;
mod user;

pub use assignment::RoleAssignment;
pub use branch::Branch;
pub use lockout::LockoutState;
pub use otp_challenge::OtpChallenge;
pub use refresh_session::{RefreshSession, SessionInfo};
pub use role::{Permission, Role, RolePermission};
pub use tenant::{Tenant, TenantState};
pub use two_factor::{BackupCode, TotpSecret};
pub use user::{User, UserState};
