//! # Authentication & Authorization Middleware
//!
//! Session-token middleware with role-based access control.
//!
//! ## Token Sources
//!
//! ```text
//! Authorization: Bearer {jwt}   — API clients; wins when both are present
//! Cookie: jwt={jwt}             — browsers
//! ```
//!
//! ## Layers
//!
//! - [`protect`]: rejects the request unless a valid token names an active
//!   user whose password has not changed since the token was issued.
//! - [`is_logged_in`]: the same check for rendered pages, except it reads
//!   only the cookie and never rejects; a failure just leaves the request
//!   anonymous.
//! - [`restrict_to`]: given an [`AllowedRoles`] list, rejects principals
//!   whose role is not in it. Must run after `protect`.
//!
//! ## CurrentUser
//!
//! Every authenticated request gets a [`CurrentUser`] injected into the
//! request extensions. Handlers extract it via the `FromRequestParts` impl.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tourbook_core::{Role, UserRecord};
use tower_cookies::Cookies;

use crate::error::AppError;
use crate::state::AppState;
use crate::token::{session_cookie, SecureTransport, SESSION_COOKIE};

/// No token on a protected route.
pub const NOT_LOGGED_IN: &str = "You are not logged in. Please login to get access";
/// The token's subject is gone or deactivated.
pub const USER_GONE: &str = "The user (belonging to this token) no longer exists";
/// The token predates the subject's last password change.
pub const PASSWORD_CHANGED: &str = "User has recently changed the password. Please login again";
/// The principal's role is not on the route's allow-list.
pub const NOT_AUTHORIZED: &str = "You're not authorized to perform this action";

// ── CurrentUser ─────────────────────────────────────────────────────────────

/// The authenticated principal, attached by [`protect`] or [`is_logged_in`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

/// Extracts the principal that the auth middleware injected into extensions.
///
/// A missing principal means the route was wired without `protect`, which
/// is a programming fault rather than a client error.
#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::Internal("no authenticated user in request context".into()))
    }
}

// ── Token lookup ────────────────────────────────────────────────────────────

/// Token from an `Authorization: Bearer` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn cookie_token(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<Cookies>()
        .and_then(|cookies| cookies.get(SESSION_COOKIE))
        .map(|cookie| cookie.value().to_string())
        .filter(|t| !t.is_empty())
}

fn candidate_token(request: &Request) -> Option<String> {
    bearer_token(request.headers())
        .map(str::to_string)
        .or_else(|| cookie_token(request))
}

/// Resolve a token to its active principal.
///
/// Fails with the token error for a bad or expired token, and with
/// `Unauthenticated` when the subject is gone or changed password after the
/// token was issued.
pub fn authenticate(state: &AppState, token: &str) -> Result<UserRecord, AppError> {
    let claims = state.tokens.verify(token)?;
    let user = state
        .active_user(&claims.subject_id)
        .ok_or_else(|| AppError::Unauthenticated(USER_GONE.into()))?;
    if user.changed_password_after(claims.issued_at) {
        return Err(AppError::Unauthenticated(PASSWORD_CHANGED.into()));
    }
    Ok(user)
}

// ── Middleware ──────────────────────────────────────────────────────────────

/// Require a valid session.
///
/// The verifier is not consulted when no token is present.
pub async fn protect(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = candidate_token(&request) else {
        tracing::warn!(reason = "missing token", path = %request.uri().path(), "authentication failed");
        return Err(AppError::Unauthenticated(NOT_LOGGED_IN.into()));
    };

    let user = authenticate(&state, &token).map_err(|err| {
        tracing::warn!(reason = err.kind(), path = %request.uri().path(), "authentication failed");
        err
    })?;

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Attach the principal when the session cookie is valid; never rejects.
pub async fn is_logged_in(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = cookie_token(&request) {
        match authenticate(&state, &token) {
            Ok(user) => {
                request.extensions_mut().insert(CurrentUser(user));
            }
            Err(err) => tracing::debug!(reason = err.kind(), "ignoring session cookie"),
        }
    }
    next.run(request).await
}

/// Roles permitted on a route.
#[derive(Debug, Clone)]
pub struct AllowedRoles(Arc<[Role]>);

impl AllowedRoles {
    /// Allow exactly these roles.
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    /// Whether `role` is on the list.
    pub fn permits(&self, role: Role) -> bool {
        self.0.contains(&role)
    }
}

/// Reject principals whose role is not in `allowed`.
///
/// Install with `from_fn_with_state(AllowedRoles::new([...]), restrict_to)`
/// inside a `protect` layer.
pub async fn restrict_to(
    State(allowed): State<AllowedRoles>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(role) = request.extensions().get::<CurrentUser>().map(|c| c.0.role) else {
        return Err(AppError::Internal(
            "restrict_to reached without an authenticated user".into(),
        ));
    };
    if !allowed.permits(role) {
        tracing::warn!(role = role.as_str(), path = %request.uri().path(), "authorization denied");
        return Err(AppError::Forbidden(NOT_AUTHORIZED.into()));
    }
    Ok(next.run(request).await)
}

// ── Credentials ─────────────────────────────────────────────────────────────

/// Run argon2 hashing or verification on the blocking pool. Callers finish
/// this before touching the user store, so no store lock is held meanwhile.
pub async fn password_work<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("password task failed: {e}")))
}

// ── Responses ───────────────────────────────────────────────────────────────

/// Issue a token for `user`, set the session cookie, and respond with
/// `{ status, token, data: { user } }`.
pub fn send_token(
    state: &AppState,
    cookies: &Cookies,
    secure: SecureTransport,
    user: &UserRecord,
    status: StatusCode,
) -> Result<Response, AppError> {
    let token = state.tokens.issue(user.id)?;
    cookies.add(session_cookie(
        token.clone(),
        state.config.jwt_cookie_expires_in_days,
        secure.0,
    ));
    let body = json!({
        "status": "success",
        "token": token,
        "data": { "user": user.public() },
    });
    Ok((status, Json(body)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, Environment};
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use tower_cookies::CookieManagerLayer;

    const SECRET: &str = "auth-tests-secret-with-at-least-32-bytes!";

    fn state() -> AppState {
        AppState::new(AppConfig::new(Environment::Production, SECRET))
    }

    fn seed_user(state: &AppState, role: Role) -> UserRecord {
        let mut user = UserRecord::new("Ana Lopez", "ana@example.com", None, "pass1234").unwrap();
        user.role = role;
        state.insert_user(user).unwrap()
    }

    async fn whoami(CurrentUser(user): CurrentUser) -> String {
        user.name
    }

    async fn maybe_whoami(user: Option<CurrentUser>) -> String {
        user.map(|CurrentUser(u)| u.name).unwrap_or_else(|| "anonymous".into())
    }

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route("/me", get(whoami))
            .route_layer(from_fn_with_state(state.clone(), protect))
            .layer(CookieManagerLayer::new())
    }

    fn restricted_app(state: AppState, roles: &[Role]) -> Router {
        Router::new()
            .route("/admin", get(whoami))
            .route_layer(from_fn_with_state(
                AllowedRoles::new(roles.iter().copied()),
                restrict_to,
            ))
            .route_layer(from_fn_with_state(state.clone(), protect))
            .layer(CookieManagerLayer::new())
    }

    fn page_app(state: AppState) -> Router {
        Router::new()
            .route("/", get(maybe_whoami))
            .route_layer(from_fn_with_state(state.clone(), is_logged_in))
            .layer(CookieManagerLayer::new())
    }

    fn get_with(uri: &str, headers: &[(&str, String)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn message(response: Response) -> String {
        let body: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
        body["message"].as_str().unwrap_or_default().to_string()
    }

    // ── password_work ────────────────────────────────────────────

    #[tokio::test]
    async fn password_work_leaves_the_store_and_runtime_free() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let work = tokio::spawn(password_work(move || wait.recv().is_ok()));

        // Lookups proceed on the current-thread runtime while the work blocks.
        tokio::task::yield_now().await;
        assert!(state.active_user(&user.id).is_some());
        assert!(!work.is_finished());

        release.send(()).unwrap();
        assert!(work.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn password_work_verifies_off_thread() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let candidate = user.clone();
        assert!(password_work(move || candidate.correct_password("pass1234")).await.unwrap());
        let hash = password_work(|| tourbook_core::hash_password("newpass123"))
            .await
            .unwrap()
            .unwrap();
        assert!(tourbook_core::verify_password("newpass123", &hash));
    }

    // ── bearer_token ─────────────────────────────────────────────

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    // ── protect ──────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_token_rejected() {
        let response = protected_app(state())
            .oneshot(get_with("/me", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message(response).await, NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn valid_bearer_token_accepted() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        let response = protected_app(state)
            .oneshot(get_with("/me", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "Ana Lopez");
    }

    #[tokio::test]
    async fn valid_cookie_accepted() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        let response = protected_app(state)
            .oneshot(get_with("/me", &[("cookie", format!("jwt={token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bearer_wins_over_cookie() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        let response = protected_app(state)
            .oneshot(get_with(
                "/me",
                &[
                    ("authorization", "Bearer not-a-token".to_string()),
                    ("cookie", format!("jwt={token}")),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            message(response).await,
            "Invalid login credentials/token. Please login again."
        );
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let mut config = AppConfig::new(Environment::Production, SECRET);
        config.jwt_expires_in = Duration::seconds(-10);
        let state = AppState::new(config);
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        let response = protected_app(state)
            .oneshot(get_with("/me", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            message(response).await,
            "Your session has expired. Please login again."
        );
    }

    #[tokio::test]
    async fn deleted_user_rejected() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        state.users.remove(&user.id);
        let response = protected_app(state)
            .oneshot(get_with("/me", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message(response).await, USER_GONE);
    }

    #[tokio::test]
    async fn password_change_invalidates_older_tokens() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        state.users.update(&user.id, |u| {
            u.password_changed_at = Some(Utc::now() + Duration::seconds(5));
        });
        let response = protected_app(state)
            .oneshot(get_with("/me", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(message(response).await, PASSWORD_CHANGED);
    }

    #[tokio::test]
    async fn logged_out_cookie_is_not_a_session() {
        let response = protected_app(state())
            .oneshot(get_with("/me", &[("cookie", "jwt=logged out".to_string())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // ── restrict_to ──────────────────────────────────────────────

    #[tokio::test]
    async fn allowed_role_passes() {
        let state = state();
        let user = seed_user(&state, Role::Admin);
        let token = state.tokens.issue(user.id).unwrap();
        let response = restricted_app(state, &[Role::Admin, Role::LeadGuide])
            .oneshot(get_with("/admin", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn other_role_forbidden() {
        let state = state();
        let user = seed_user(&state, Role::Guide);
        let token = state.tokens.issue(user.id).unwrap();
        let response = restricted_app(state, &[Role::Admin, Role::LeadGuide])
            .oneshot(get_with("/admin", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(message(response).await, NOT_AUTHORIZED);
    }

    #[tokio::test]
    async fn restrict_without_protect_is_internal_fault() {
        let app = Router::new()
            .route("/admin", get(|| async { "unreachable" }))
            .route_layer(from_fn_with_state(AllowedRoles::new([Role::Admin]), restrict_to));
        let response = app.oneshot(get_with("/admin", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn current_user_extractor_without_principal_is_internal_fault() {
        let app = Router::new().route("/me", get(whoami));
        let response = app.oneshot(get_with("/me", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn allowed_roles_permits_listed_only() {
        let allowed = AllowedRoles::new([Role::User, Role::Admin]);
        assert!(allowed.permits(Role::User));
        assert!(allowed.permits(Role::Admin));
        assert!(!allowed.permits(Role::Guide));
        assert!(!allowed.permits(Role::LeadGuide));
    }

    // ── is_logged_in ─────────────────────────────────────────────

    #[tokio::test]
    async fn is_logged_in_attaches_principal_from_cookie() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        let response = page_app(state)
            .oneshot(get_with("/", &[("cookie", format!("jwt={token}"))]))
            .await
            .unwrap();
        assert_eq!(text(response).await, "Ana Lopez");
    }

    #[tokio::test]
    async fn is_logged_in_ignores_bearer_header() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let token = state.tokens.issue(user.id).unwrap();
        let response = page_app(state)
            .oneshot(get_with("/", &[("authorization", format!("Bearer {token}"))]))
            .await
            .unwrap();
        assert_eq!(text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn is_logged_in_swallows_garbage_cookie() {
        let response = page_app(state())
            .oneshot(get_with("/", &[("cookie", "jwt=garbage".to_string())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "anonymous");
    }

    // ── send_token ───────────────────────────────────────────────

    #[tokio::test]
    async fn send_token_sets_cookie_and_hides_credentials() {
        let state = state();
        let user = seed_user(&state, Role::User);
        let app = Router::new()
            .route(
                "/login",
                get({
                    let state = state.clone();
                    move |cookies: Cookies, secure: SecureTransport| {
                        let state = state.clone();
                        let user = user.clone();
                        async move { send_token(&state, &cookies, secure, &user, StatusCode::OK) }
                    }
                }),
            )
            .layer(CookieManagerLayer::new());

        let response = app
            .oneshot(get_with("/login", &[("x-forwarded-proto", "https".to_string())]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("jwt="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));

        let body: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(body["status"], "success");
        let token = body["token"].as_str().unwrap();
        let user_id = body["data"]["user"]["id"].as_str().unwrap();
        assert_eq!(
            state.tokens.verify(token).unwrap().subject_id,
            user_id.parse::<uuid::Uuid>().unwrap()
        );
        assert!(body["data"]["user"].get("passwordHash").is_none());
        assert!(body["data"]["user"].get("active").is_none());
    }
}
