//! # Route Modules
//!
//! - `users` — signup, login/logout, password reset and update, the
//!   caller's own account, admin user management.
//! - `tours` — public catalogue reads; writes for admins and lead guides.
//! - `reviews` — review CRUD, top-level and nested under a tour. Every
//!   write recomputes the tour's rating aggregates.
//! - `bookings` — payment session creation and booking management.
//! - `views` — the rendered site (overview, tour detail, login, account).
//!
//! API routers are mounted under `/api/v1`. Access levels are separate
//! routers, merged, each carrying its own `protect` / `restrict_to` route
//! layers, so the pipeline for a route is visible where it is registered.

pub mod bookings;
pub mod reviews;
pub mod tours;
pub mod users;
pub mod views;

use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tourbook_core::Role;

use crate::auth::{protect, restrict_to, AllowedRoles};
use crate::error::AppError;
use crate::state::AppState;
use crate::token::SecureTransport;

/// Every `/api/v1` route.
pub fn api_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(users::router(state))
        .merge(tours::router(state))
        .merge(reviews::router(state))
        .merge(bookings::router(state))
}

// -- Access levels --------------------------------------------------------------

/// Require a session on every route of `router`.
pub(crate) fn protected(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router.route_layer(from_fn_with_state(state.clone(), protect))
}

/// Require a session whose role is one of `roles`.
pub(crate) fn restricted(
    router: Router<AppState>,
    state: &AppState,
    roles: impl IntoIterator<Item = Role>,
) -> Router<AppState> {
    // route_layer wraps outside-in: the last one added runs first.
    let router = router.route_layer(from_fn_with_state(AllowedRoles::new(roles), restrict_to));
    protected(router, state)
}

// -- Response envelopes ---------------------------------------------------------

/// `{ status: "success", results, data: { data: [...] } }`
pub fn list<T: Serialize>(items: &[T]) -> Json<Value> {
    Json(json!({
        "status": "success",
        "results": items.len(),
        "data": { "data": items },
    }))
}

/// `{ status: "success", data: { data } }`
pub fn single<T: Serialize>(item: &T) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "data": item },
    }))
}

/// 201 with the single-record envelope.
pub fn created<T: Serialize>(item: &T) -> Response {
    (StatusCode::CREATED, single(item)).into_response()
}

/// 204, no body.
pub fn deleted() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Serialize a record for embedding in a response body.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(format!("serialization failed: {e}")))
}

/// `{scheme}://{host}` of the current request, for links in emails and
/// payment redirects.
pub(crate) fn origin(secure: SecureTransport, headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost");
    format!("{}://{host}", secure.scheme())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_envelope_counts_results() {
        let Json(body) = list(&["a", "b"]);
        assert_eq!(body["status"], "success");
        assert_eq!(body["results"], 2);
        assert_eq!(body["data"]["data"][1], "b");
    }

    #[test]
    fn single_envelope_wraps_data() {
        let Json(body) = single(&json!({ "id": 1 }));
        assert_eq!(body, json!({ "status": "success", "data": { "data": { "id": 1 } } }));
    }

    #[test]
    fn origin_uses_host_and_transport() {
        let mut headers = HeaderMap::new();
        assert_eq!(origin(SecureTransport(false), &headers), "http://localhost");
        headers.insert(header::HOST, "tours.example.com".parse().unwrap());
        assert_eq!(
            origin(SecureTransport(true), &headers),
            "https://tours.example.com"
        );
    }
}
