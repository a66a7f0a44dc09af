//! Sign-in, sign-up, email confirmation and session handling.
//!
//! Provider sessions never leave the service: clients hold an opaque
//! `greenquest_session` cookie (or `Authorization: Bearer <key>`) that maps to
//! a session in the identity provider's store.

pub mod callback;
pub mod login;
pub mod session;
pub mod signup;
mod state;

pub use state::AuthConfig;
