//! Who is signed in and what they may see.

pub mod guards;
pub mod role;
pub mod service;

pub use guards::{admin_only, landing, paths, user_only, GuardDecision, Redirect};
pub use role::{Role, RoleLookup, RoleResolver};
pub use service::{AuthService, AuthSnapshot};
