//! Route guards. Pure functions of the auth snapshot; the HTTP layer turns a
//! [`GuardDecision`] into a response.

use super::{role::Role, service::AuthSnapshot};
use url::form_urlencoded::byte_serialize;

pub mod paths {
    pub const HOME: &str = "/";
    pub const LOGIN: &str = "/login";
    pub const SIGNUP: &str = "/signup";
    pub const ADMIN_LOGIN: &str = "/admin/login";
    pub const ADMIN_SIGNUP: &str = "/admin/signup";
    pub const AUTH_CALLBACK: &str = "/auth/callback";
    pub const USER_APP: &str = "/app";
    pub const ADMIN_DASHBOARD: &str = "/admin";
    pub const COMMUNITY: &str = "/community";
    pub const REDEEM: &str = "/redeem";
    pub const PROFILE: &str = "/profile";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
    pub to: &'static str,
    /// Where the visitor was headed, so login can send them back.
    pub from: Option<String>,
}

impl Redirect {
    const fn to(to: &'static str) -> Self {
        Self { to, from: None }
    }

    fn preserving(to: &'static str, origin: &str) -> Self {
        Self {
            to,
            from: Some(origin.to_string()),
        }
    }

    /// Value for the `Location` header.
    #[must_use]
    pub fn location(&self) -> String {
        match &self.from {
            Some(from) => {
                let from: String = byte_serialize(from.as_bytes()).collect();
                format!("{}?from={from}", self.to)
            }
            None => self.to.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardDecision {
    /// Auth state has not settled; show a loading indicator.
    Loading,
    Redirect(Redirect),
    Render,
}

/// Admin-only pages. Visitors without a session or a resolved role go to the
/// admin login; non-admins go to their dashboard.
#[must_use]
pub fn admin_only(auth: &AuthSnapshot, origin: &str) -> GuardDecision {
    if auth.loading {
        return GuardDecision::Loading;
    }
    match (auth.session.is_some(), auth.role) {
        (true, Some(Role::Admin)) => GuardDecision::Render,
        (true, Some(Role::User)) => GuardDecision::Redirect(Redirect::to(paths::USER_APP)),
        _ => GuardDecision::Redirect(Redirect::preserving(paths::ADMIN_LOGIN, origin)),
    }
}

/// Pages for signed-in regular users. Admins are sent to their dashboard.
#[must_use]
pub fn user_only(auth: &AuthSnapshot, origin: &str) -> GuardDecision {
    if auth.loading {
        return GuardDecision::Loading;
    }
    match (auth.session.is_some(), auth.role) {
        (true, Some(Role::User)) => GuardDecision::Render,
        (true, Some(Role::Admin)) => GuardDecision::Redirect(Redirect::to(paths::ADMIN_DASHBOARD)),
        _ => GuardDecision::Redirect(Redirect::preserving(paths::LOGIN, origin)),
    }
}

/// The landing route never renders; it always forwards somewhere.
#[must_use]
pub fn landing(auth: &AuthSnapshot) -> GuardDecision {
    if auth.loading {
        return GuardDecision::Loading;
    }
    let to = if auth.session.is_none() {
        paths::LOGIN
    } else if auth.is_admin() {
        paths::ADMIN_DASHBOARD
    } else {
        paths::USER_APP
    };
    GuardDecision::Redirect(Redirect::to(to))
}
