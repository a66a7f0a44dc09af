use super::handlers::{
    assignments, auth, charities, community, health, pages, points, profile, quests,
    submissions, users,
};
use crate::auth::Role;
use utoipa::{
    openapi::{Contact, InfoBuilder, License, Tag},
    OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        pages::home,
        pages::app_page,
        pages::admin_page,
        pages::community_page,
        pages::redeem_page,
        pages::profile_page,
        auth::login::login,
        auth::login::admin_login,
        auth::login::login_page,
        auth::login::signup_page,
        auth::login::admin_login_page,
        auth::login::admin_signup_page,
        auth::signup::signup,
        auth::signup::admin_signup,
        auth::callback::callback,
        auth::session::session,
        auth::session::logout,
        profile::get_me,
        profile::patch_me,
        quests::catalog,
        quests::list_quests,
        quests::create_quest,
        quests::update_quest,
        quests::delete_quest,
        assignments::my_assignments,
        assignments::complete_assignment,
        assignments::list_assignments,
        assignments::assign_quest,
        assignments::update_status,
        assignments::delete_assignment,
        submissions::submit,
        submissions::my_submissions,
        submissions::pending_submissions,
        submissions::approve,
        submissions::reject,
        community::feed,
        charities::list_charities,
        charities::donate,
        users::list_users,
    ),
    components(schemas(
        Role,
        health::Health,
        points::Balance,
        profile::UserDetails,
        profile::ProfileUpdateRequest,
        quests::Quest,
        quests::QuestRequest,
        quests::CatalogQuest,
        assignments::Assignment,
        assignments::AssignmentQuest,
        assignments::AssignmentStatus,
        assignments::AssignRequest,
        assignments::AssignResponse,
        assignments::StatusRequest,
        assignments::StatusResponse,
        submissions::Submission,
        submissions::PendingSubmission,
        submissions::SubmitRequest,
        submissions::ImagePayload,
        submissions::ReviewResponse,
        community::CommunityPost,
        community::CommunityFeed,
        charities::Charity,
        charities::DonationRequest,
        charities::DonationResponse,
        pages::AppPage,
        pages::AdminDashboard,
        pages::RedeemPage,
        auth::login::LoginRequest,
        auth::login::LoginResponse,
        auth::login::AuthPage,
        auth::signup::RegisterRequest,
        auth::signup::RegisterResponse,
        auth::session::SessionResponse,
    ))
)]
struct ApiDoc;

/// The `OpenAPI` document served at `/api-docs/openapi.json`.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info = cargo_info();
    doc.tags = Some(
        [
            ("health", "Liveness and database reachability"),
            ("pages", "Guarded page views"),
            ("auth", "Sign-in, sign-up and sessions"),
            ("profile", "The caller's profile"),
            ("quests", "Quest catalog"),
            ("assignments", "Assigned quests"),
            ("submissions", "Quest proof submissions"),
            ("community", "Community feed"),
            ("redeem", "Charities and donations"),
            ("admin", "Administration"),
        ]
        .into_iter()
        .map(|(name, description)| {
            let mut tag = Tag::new(name);
            tag.description = Some(description.to_string());
            tag
        })
        .collect(),
    );
    doc
}

fn cargo_info() -> utoipa::openapi::Info {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    info
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));

        let contact = doc.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Greenquest"));
            assert_eq!(contact.email.as_deref(), Some("team@greenquest.dev"));
        }

        let license = doc.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Ada <ada@example.com>"),
            (Some("Ada"), Some("ada@example.com"))
        );
        assert_eq!(parse_author("<ada@example.com>"), (None, Some("ada@example.com")));
        assert_eq!(parse_author("Ada"), (Some("Ada"), None));
    }

    #[test]
    fn openapi_tags_and_paths() {
        let doc = openapi();
        let tags = doc.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "admin"));
        for path in [
            "/health",
            "/app",
            "/admin",
            "/login",
            "/v1/admin/submissions/{id}/approve",
            "/v1/donations",
            "/v1/assignments/{id}/complete",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
