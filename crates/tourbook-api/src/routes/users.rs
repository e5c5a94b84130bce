//! # User & Session API
//!
//! Public session routes (signup, login, logout, password reset), the
//! caller's own account (behind `protect`), and admin-only user management.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tourbook_core::{
    hash_password, reset_token_digest, validate_password_pair, NewUser, PublicUser, Role, StoreError, UserPatch,
    UserRecord,
};
use tower_cookies::Cookies;

use super::{deleted, list, origin, protected, restricted, single};
use crate::auth::{password_work, send_token, CurrentUser};
use crate::error::AppError;
use crate::extractors::{extract_json, path_id};
use crate::mail::{Email, EmailKind};
use crate::state::AppState;
use crate::token::{logout_cookie, SecureTransport};

const MISSING_CREDENTIALS: &str = "Please ensure both the email and password fields are not empty";
const INCORRECT_CREDENTIALS: &str = "Incorrect email or password";
const NO_SUCH_EMAIL: &str = "There is no user with the email address provided";
const MAIL_FAILED: &str = "There was an error sending an email. Try again later!";
const BAD_RESET_TOKEN: &str = "Password reset request/token is either invalid or expired";
const WRONG_PASSWORD: &str = "The password you provided is wrong";
const NOT_FOR_PASSWORDS: &str =
    "This route is not for password updates. Please use updatePassword route";
const USE_SIGNUP: &str = "This route does not exist. Please use \"/signup\" instead.";

/// Login credentials.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Password reset request.
#[derive(Debug, Default, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

/// New password with confirmation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

/// Password change for a logged-in user.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub password_current: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
}

/// Self-service profile edit. Password fields are accepted only so they
/// can be refused.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<serde_json::Value>,
    pub password_confirm: Option<serde_json::Value>,
}

/// Build the users router.
pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/users/signup", post(signup))
        .route("/users/login", post(login))
        .route("/users/logout", get(logout))
        .route("/users/forgotPassword", post(forgot_password))
        .route("/users/resetPassword/:token", patch(reset_password));

    let account = Router::new()
        .route("/users/updatePassword", patch(update_password))
        .route("/users/currentUser", get(current_user))
        .route("/users/updateCurrentUser", patch(update_current_user))
        .route("/users/deleteCurrentUser", delete(delete_current_user));

    let admin = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        );

    public
        .merge(protected(account, state))
        .merge(restricted(admin, state, [Role::Admin]))
}

// -- Sessions ---------------------------------------------------------------------

/// POST /users/signup — Create an account and log it in.
///
/// Only name, email, password, confirmation and photo are read from the
/// body; a client cannot choose its role.
async fn signup(
    State(state): State<AppState>,
    cookies: Cookies,
    secure: SecureTransport,
    headers: HeaderMap,
    body: Result<Json<NewUser>, JsonRejection>,
) -> Result<Response, AppError> {
    let new = extract_json(body)?;
    new.validate().map_err(StoreError::from)?;

    let user = password_work(move || {
        UserRecord::new(&new.name, &new.email, new.photo, &new.password)
    })
    .await??;
    let user = state.insert_user(user)?;
    state.persist(&user).await?;
    tracing::info!(user_id = %user.id, "user signed up");

    let url = format!("{}/me", origin(secure, &headers));
    if let Err(e) = state
        .mailer
        .send(Email::new(&user.email, &user.name, url, EmailKind::Welcome))
        .await
    {
        tracing::warn!(user_id = %user.id, error = %e, "welcome email not sent");
    }

    send_token(&state, &cookies, secure, &user, StatusCode::CREATED)
}

/// POST /users/login
async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    secure: SecureTransport,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = extract_json(body)?;
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest(MISSING_CREDENTIALS.into()));
    }

    // Same message for unknown email and wrong password.
    let incorrect = || AppError::Unauthenticated(INCORRECT_CREDENTIALS.into());
    let user = state.user_by_email(&req.email).ok_or_else(incorrect)?;
    let candidate = user.clone();
    let password = req.password;
    if !password_work(move || candidate.correct_password(&password)).await? {
        return Err(incorrect());
    }

    send_token(&state, &cookies, secure, &user, StatusCode::OK)
}

/// GET /users/logout — Overwrite the session cookie.
async fn logout(cookies: Cookies, secure: SecureTransport) -> Response {
    cookies.add(logout_cookie(secure.0));
    Json(json!({ "status": "success" })).into_response()
}

/// POST /users/forgotPassword — Mail a single-use reset link.
async fn forgot_password(
    State(state): State<AppState>,
    secure: SecureTransport,
    headers: HeaderMap,
    body: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = extract_json(body)?;
    let user = state
        .user_by_email(&req.email)
        .ok_or_else(|| AppError::NotFound(NO_SUCH_EMAIL.into()))?;

    let mut token = String::new();
    let user = state
        .users
        .update(&user.id, |u| token = u.create_password_reset_token(Utc::now()))
        .ok_or_else(AppError::no_document)?;
    state.persist(&user).await?;

    let url = format!(
        "{}/api/v1/users/resetPassword/{token}",
        origin(secure, &headers)
    );
    let email = Email::new(&user.email, &user.name, url, EmailKind::PasswordReset);
    if let Err(e) = state.mailer.send(email).await {
        tracing::error!(user_id = %user.id, error = %e, "password reset email failed");
        if let Some(user) = state.users.update(&user.id, UserRecord::clear_password_reset) {
            state.persist(&user).await?;
        }
        return Err(AppError::ServiceFailure(MAIL_FAILED.into()));
    }

    Ok(Json(json!({ "status": "success", "message": "Token sent to email!" })).into_response())
}

/// PATCH /users/resetPassword/:token — Set a new password with a reset token.
async fn reset_password(
    State(state): State<AppState>,
    cookies: Cookies,
    secure: SecureTransport,
    Path(token): Path<String>,
    body: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = extract_json(body)?;
    let now = Utc::now();
    let digest = reset_token_digest(&token);
    let holder = state
        .user_by_reset_digest(&digest, now)
        .ok_or_else(|| AppError::BadRequest(BAD_RESET_TOKEN.into()))?;

    validate_password_pair(&req.password, &req.password_confirm)
        .into_result()
        .map_err(StoreError::from)?;

    let password = req.password;
    let new_hash = password_work(move || hash_password(&password)).await??;
    let user = state
        .update_user(&holder.id, |u| {
            // Consumed by a concurrent request since the lookup.
            if !u.reset_token_matches(&digest, now) {
                return Err(AppError::BadRequest(BAD_RESET_TOKEN.into()));
            }
            u.replace_password_hash(new_hash, now);
            Ok(())
        })?
        .ok_or_else(|| AppError::BadRequest(BAD_RESET_TOKEN.into()))?;
    state.persist(&user).await?;

    send_token(&state, &cookies, secure, &user, StatusCode::OK)
}

// -- Own account ------------------------------------------------------------------

/// PATCH /users/updatePassword
async fn update_password(
    State(state): State<AppState>,
    cookies: Cookies,
    secure: SecureTransport,
    CurrentUser(me): CurrentUser,
    body: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = extract_json(body)?;
    let current = req.password_current;
    let holder = me.clone();
    if !password_work(move || holder.correct_password(&current)).await? {
        return Err(AppError::Unauthenticated(WRONG_PASSWORD.into()));
    }
    validate_password_pair(&req.password, &req.password_confirm)
        .into_result()
        .map_err(StoreError::from)?;

    let password = req.password;
    let new_hash = password_work(move || hash_password(&password)).await??;
    let now = Utc::now();
    let user = state
        .update_user(&me.id, |u| {
            u.replace_password_hash(new_hash, now);
            Ok(())
        })?
        .ok_or_else(AppError::no_document)?;
    state.persist(&user).await?;

    send_token(&state, &cookies, secure, &user, StatusCode::OK)
}

/// GET /users/currentUser
async fn current_user(CurrentUser(me): CurrentUser) -> Json<serde_json::Value> {
    single(&me.public())
}

/// PATCH /users/updateCurrentUser — Change name and/or email.
async fn update_current_user(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    body: Result<Json<UpdateMeRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let req = extract_json(body)?;
    if req.password.is_some() || req.password_confirm.is_some() {
        return Err(AppError::BadRequest(NOT_FOR_PASSWORDS.into()));
    }
    let patch = UserPatch {
        name: req.name,
        email: req.email,
        ..UserPatch::default()
    };
    let user = update_profile(&state, &me, patch).await?;
    Ok(Json(json!({ "status": "success", "data": { "user": user } })))
}

/// Apply a self-service profile patch and persist it.
pub(crate) async fn update_profile(
    state: &AppState,
    me: &UserRecord,
    patch: UserPatch,
) -> Result<PublicUser, AppError> {
    let user = state
        .update_user(&me.id, |u| u.apply(patch).map_err(|e| StoreError::from(e).into()))?
        .ok_or_else(AppError::no_document)?;
    state.persist(&user).await?;
    Ok(user.public())
}

/// DELETE /users/deleteCurrentUser — Deactivate the caller's account.
async fn delete_current_user(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Result<StatusCode, AppError> {
    let user = state
        .users
        .update(&me.id, |u| u.active = false)
        .ok_or_else(AppError::no_document)?;
    state.persist(&user).await?;
    tracing::info!(user_id = %user.id, "user deactivated own account");
    Ok(deleted())
}

// -- Admin ------------------------------------------------------------------------

/// GET /users — Every active user, by name.
async fn list_users(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut users: Vec<PublicUser> = state
        .users
        .filter(|u| u.active)
        .iter()
        .map(UserRecord::public)
        .collect();
    users.sort_by(|a, b| a.name.cmp(&b.name));
    list(&users)
}

/// POST /users — Accounts are created through signup only.
async fn create_user() -> AppError {
    AppError::ServiceFailure(USE_SIGNUP.into())
}

/// GET /users/:id
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = path_id("id", &id)?;
    let user = state.active_user(&id).ok_or_else(AppError::no_document)?;
    Ok(single(&user.public()))
}

/// PATCH /users/:id — Admin edit; passwords are not reachable here.
async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<UserPatch>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = path_id("id", &id)?;
    let patch = extract_json(body)?;
    let user = state
        .update_user(&id, |u| u.apply(patch).map_err(|e| StoreError::from(e).into()))?
        .ok_or_else(AppError::no_document)?;
    state.persist(&user).await?;
    Ok(single(&user.public()))
}

/// DELETE /users/:id — Remove an account permanently.
async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = path_id("id", &id)?;
    state.users.remove(&id).ok_or_else(AppError::no_document)?;
    state.forget::<UserRecord>(id).await?;
    tracing::info!(user_id = %id, "user deleted");
    Ok(deleted())
}
