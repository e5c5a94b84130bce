//! # tourbook-api — Axum Service
//!
//! HTTP service for the tourbook booking site, built on Axum/Tower/Tokio.
//! Serves a JSON API under `/api/v1` and a server-rendered site at the root.
//!
//! ## Routes
//!
//! | Prefix                  | Module                    | Access                   |
//! |-------------------------|---------------------------|--------------------------|
//! | `/api/v1/users/*`       | [`routes::users`]         | public / protect / admin |
//! | `/api/v1/tours/*`       | [`routes::tours`]         | public / staff           |
//! | `/api/v1/reviews/*`     | [`routes::reviews`]       | protect / role-gated     |
//! | `/api/v1/booking/*`     | [`routes::bookings`]      | protect / staff          |
//! | `/`, `/tour/*`, `/me`   | [`routes::views`]         | is_logged_in / protect   |
//! | `/health/*`             | this module               | unauthenticated          |
//!
//! ## Middleware Stack (Tower)
//!
//! TraceLayer → Compression → security headers → normalize_errors →
//! CatchPanic → Cookies → CORS → body limit → (`/api/v1` only) rate limit →
//! route layers (protect, restrict_to).
//!
//! ## Crate Policy
//!
//! - Record rules live in `tourbook-core`; handlers orchestrate.
//! - Every failure is an [`AppError`] and is rendered once, by
//!   [`error::normalize_errors`].

pub mod auth;
pub mod boundary;
pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod mail;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod token;
pub mod views;

pub use error::AppError;
pub use state::AppState;

use axum::extract::{DefaultBodyLimit, OriginalUri, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_cookies::CookieManagerLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::rate_limit::rate_limit_middleware;
use crate::middleware::security_headers::{security_headers_middleware, SecurityHeaders};

/// Largest accepted request body (JSON or form).
pub const BODY_LIMIT: usize = 10 * 1024;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes are mounted outside `/api/v1` so they are never rate
/// limited.
pub fn app(state: AppState) -> Router {
    let api = routes::api_router(&state)
        .fallback(not_found)
        .layer(from_fn_with_state(state.limiter.clone(), rate_limit_middleware));

    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness));

    Router::new()
        .merge(health)
        .nest("/api/v1", api)
        .merge(routes::views::router(&state))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(CookieManagerLayer::new())
        .layer(CatchPanicLayer::custom(boundary::panic_response))
        .layer(from_fn_with_state(state.clone(), error::normalize_errors))
        .layer(from_fn_with_state(
            SecurityHeaders::default(),
            security_headers_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Fallback for every unmatched path, on both channels. A known path hit
/// with an unhandled method is turned into the same 404 by
/// [`error::normalize_errors`].
async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::unmatched(&uri)
}

/// Liveness probe — the process is up and serving.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe — when a database is configured, it answers.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}
