use greenquest::{
    auth::{admin_only, landing, paths, user_only, AuthSnapshot, GuardDecision, Role},
    identity::{Identity, Session},
};
use secrecy::SecretString;
use serde_json::Value;
use uuid::Uuid;

fn signed_in(role: Option<Role>) -> AuthSnapshot {
    let user = Identity {
        id: Uuid::new_v4(),
        email: Some("student@example.com".to_string()),
        user_metadata: Value::Null,
        app_metadata: Value::Null,
    };
    AuthSnapshot {
        loading: false,
        session: Some(Session {
            access_token: SecretString::from("token".to_string()),
            refresh_token: SecretString::from("refresh".to_string()),
            expires_at: i64::MAX,
            user: user.clone(),
        }),
        user: Some(user),
        role,
    }
}

fn redirect_location(decision: GuardDecision) -> Option<String> {
    match decision {
        GuardDecision::Redirect(redirect) => Some(redirect.location()),
        _ => None,
    }
}

#[test]
fn anonymous_visitors_are_sent_to_login_with_origin() {
    let auth = AuthSnapshot::signed_out();
    assert_eq!(
        redirect_location(user_only(&auth, "/redeem")).as_deref(),
        Some("/login?from=%2Fredeem")
    );
    assert_eq!(
        redirect_location(admin_only(&auth, "/admin")).as_deref(),
        Some("/admin/login?from=%2Fadmin")
    );
    assert_eq!(
        redirect_location(landing(&auth)).as_deref(),
        Some(paths::LOGIN)
    );
}

#[test]
fn roles_land_on_their_own_dashboard() {
    let admin = signed_in(Some(Role::Admin));
    let student = signed_in(Some(Role::User));

    assert_eq!(admin_only(&admin, "/admin"), GuardDecision::Render);
    assert_eq!(user_only(&student, "/app"), GuardDecision::Render);
    assert_eq!(
        redirect_location(user_only(&admin, "/app")).as_deref(),
        Some(paths::ADMIN_DASHBOARD)
    );
    assert_eq!(
        redirect_location(admin_only(&student, "/admin")).as_deref(),
        Some(paths::USER_APP)
    );
}

#[test]
fn unsettled_state_never_redirects() {
    let auth = AuthSnapshot::initial();
    assert_eq!(landing(&auth), GuardDecision::Loading);
    assert_eq!(user_only(&auth, "/app"), GuardDecision::Loading);
    assert_eq!(admin_only(&auth, "/admin"), GuardDecision::Loading);
}

#[test]
fn openapi_lists_student_and_admin_routes() {
    let doc = greenquest::api::openapi();
    for path in [
        "/health",
        "/v1/submissions",
        "/v1/donations",
        "/v1/admin/submissions/{id}/approve",
        "/v1/admin/users",
    ] {
        assert!(doc.paths.paths.contains_key(path), "missing {path}");
    }
}

#[test]
fn cli_reports_package_version() {
    let command = greenquest::cli::commands::new();
    assert_eq!(command.get_name(), "greenquest");
    assert_eq!(
        command.get_version().map(ToString::to_string),
        Some(env!("CARGO_PKG_VERSION").to_string())
    );
}
