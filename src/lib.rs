//! # Greenquest (sustainability quests, points and donations)
//!
//! `greenquest` is the HTTP service behind the Greenquest app. Students complete
//! quests, submit proof and earn points that can be redeemed as donations to
//! charities; administrators create quests, assign them and review submissions.
//!
//! ## Identity
//!
//! Authentication is delegated to a hosted identity provider (password sign-in,
//! sign-up and email confirmation). The service keeps provider sessions behind an
//! opaque `greenquest_session` cookie and never stores passwords.
//!
//! ## Roles and Guards
//!
//! A session's role comes from the role claim embedded in the provider token, with
//! a fallback lookup in `user_details`. Page routes are gated by three guards:
//! student-only, admin-only and a role-based landing redirect. Anonymous visitors
//! are redirected to the matching login page with the origin path preserved.
//!
//! ## Points
//!
//! Approving a quest awards its points with an atomic increment in the same
//! transaction that flips the review status, so concurrent approvals never lose
//! updates and a second approval of the same item is a no-op.

pub mod api;
pub mod auth;
pub mod cli;
pub mod identity;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
