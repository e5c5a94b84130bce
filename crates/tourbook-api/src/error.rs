//! # Error Model & Normalization
//!
//! Every failure in the request pipeline (authentication, authorization,
//! handler logic, a panic caught by the boundary layer) becomes an
//! [`AppError`]. Its `IntoResponse` impl attaches an [`ErrorReport`] to the
//! response; the terminal [`normalize_errors`] middleware then re-renders
//! that response for the configured environment and the request's channel.
//!
//! ## Translation
//!
//! Raw failures from the record layer and the token verifier are translated
//! into operational errors with user-facing messages before rendering:
//!
//! | Raw error                | Status | Message                                      |
//! |--------------------------|--------|----------------------------------------------|
//! | `StoreError::InvalidId`  | 400    | `Invalid {path}: {value}`                    |
//! | `StoreError::Duplicate`  | 400    | `Duplicate field value: {value}. ...`        |
//! | `StoreError::Validation` | 400    | `Invalid input data: {msg}. {msg}`           |
//! | `TokenError::Invalid`    | 401    | `Invalid login credentials/token. ...`       |
//! | `TokenError::Expired`    | 401    | `Your session has expired. ...`              |
//!
//! ## Rendering
//!
//! | Environment | Channel | Operational              | Programming fault            |
//! |-------------|---------|--------------------------|------------------------------|
//! | development | API     | full report with `stack` | full report with `stack`     |
//! | development | page    | `error` page, raw text   | `error` page, raw text       |
//! | production  | API     | `{ status, message }`    | 500 `Something went wrong`   |
//! | production  | page    | `error` page, message    | 500 `Please try again later.`|
//!
//! The channel is the JSON API when the original path starts with `/api`,
//! the rendered site otherwise.

use std::error::Error as _;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tourbook_core::{PasswordError, StoreError};

use crate::config::Environment;
use crate::state::AppState;
use crate::token::TokenError;
use crate::views::PageRenderer;

/// Body message for masked programming faults on the API channel.
pub const GENERIC_API_MESSAGE: &str = "Something went wrong";
/// Title of every rendered error page.
pub const ERROR_PAGE_TITLE: &str = "Something went wrong!";
/// Page message for masked programming faults on the rendered channel.
pub const GENERIC_PAGE_MESSAGE: &str = "Please try again later.";

// -- Operational error --------------------------------------------------------

/// Status classification derived from the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStatus {
    /// Client error (4xx).
    Fail,
    /// Anything else.
    Error,
}

impl ErrorStatus {
    /// `fail` for 4xx codes, `error` for everything else.
    pub fn for_code(code: StatusCode) -> Self {
        if code.is_client_error() {
            Self::Fail
        } else {
            Self::Error
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// A failure ready to be shown: message, code, classification, and whether
/// it is safe to show to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationalError {
    /// User-facing message.
    pub message: String,
    /// HTTP status code.
    pub status_code: StatusCode,
    /// Always consistent with `status_code`.
    pub status: ErrorStatus,
    /// `false` for programming faults, which production masks.
    pub is_operational: bool,
}

impl OperationalError {
    /// An expected failure with a trusted message.
    pub fn new(message: impl Into<String>, status_code: StatusCode) -> Self {
        Self {
            message: message.into(),
            status_code,
            status: ErrorStatus::for_code(status_code),
            is_operational: true,
        }
    }

    /// A programming fault. Always 500; the message is for logs only.
    pub fn programming(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            status: ErrorStatus::Error,
            is_operational: false,
        }
    }
}

// -- Application error --------------------------------------------------------

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Missing, invalid, or stale credentials (401).
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated but not permitted (403).
    #[error("{0}")]
    Forbidden(String),

    /// Resource or route not found (404).
    #[error("{0}")]
    NotFound(String),

    /// Malformed or unacceptable request (400).
    #[error("{0}")]
    BadRequest(String),

    /// Rate limit exhausted (429).
    #[error("{0}")]
    TooManyRequests(String),

    /// An expected failure of a collaborator, safe to report (500).
    #[error("{0}")]
    ServiceFailure(String),

    /// Raw record-layer failure, translated before rendering.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Raw token failure, translated before rendering.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Programming fault (500). Logged in full, masked in production.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// The standard 404 for a lookup by id.
    pub fn no_document() -> Self {
        Self::NotFound("No document found with that ID".to_string())
    }

    /// The 404 for a method and path no route handles.
    pub fn unmatched(uri: &Uri) -> Self {
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        Self::NotFound(format!("Unable to find {target}"))
    }

    /// Short machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::BadRequest(_) => "BadRequest",
            Self::TooManyRequests(_) => "TooManyRequests",
            Self::ServiceFailure(_) => "ServiceFailure",
            Self::Store(StoreError::InvalidId { .. }) => "InvalidId",
            Self::Store(StoreError::Duplicate { .. }) => "DuplicateField",
            Self::Store(StoreError::Validation(_)) => "ValidationFailed",
            Self::Token(TokenError::Invalid(_)) => "InvalidToken",
            Self::Token(TokenError::Expired) => "ExpiredToken",
            Self::Token(TokenError::Signing(_)) => "TokenSigning",
            Self::Internal(_) => "Internal",
        }
    }

    /// Translate into the operational form shown to clients.
    pub fn to_operational(&self) -> OperationalError {
        match self {
            Self::Unauthenticated(m) => OperationalError::new(m.as_str(), StatusCode::UNAUTHORIZED),
            Self::Forbidden(m) => OperationalError::new(m.as_str(), StatusCode::FORBIDDEN),
            Self::NotFound(m) => OperationalError::new(m.as_str(), StatusCode::NOT_FOUND),
            Self::BadRequest(m) => OperationalError::new(m.as_str(), StatusCode::BAD_REQUEST),
            Self::TooManyRequests(m) => {
                OperationalError::new(m.as_str(), StatusCode::TOO_MANY_REQUESTS)
            }
            Self::ServiceFailure(m) => {
                OperationalError::new(m.as_str(), StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Store(StoreError::InvalidId { path, value }) => OperationalError::new(
                format!("Invalid {path}: {value}"),
                StatusCode::BAD_REQUEST,
            ),
            Self::Store(StoreError::Duplicate { value, .. }) => OperationalError::new(
                format!("Duplicate field value: {value}. Please use another value."),
                StatusCode::BAD_REQUEST,
            ),
            Self::Store(StoreError::Validation(errors)) => OperationalError::new(
                format!("Invalid input data: {}", errors.messages().join(". ")),
                StatusCode::BAD_REQUEST,
            ),
            Self::Token(TokenError::Invalid(_)) => OperationalError::new(
                "Invalid login credentials/token. Please login again.",
                StatusCode::UNAUTHORIZED,
            ),
            Self::Token(TokenError::Expired) => OperationalError::new(
                "Your session has expired. Please login again.",
                StatusCode::UNAUTHORIZED,
            ),
            Self::Token(TokenError::Signing(m)) | Self::Internal(m) => {
                OperationalError::programming(m.as_str())
            }
        }
    }

    /// `Display` of this error followed by its `Debug` form and source chain.
    fn diagnostic_chain(&self) -> String {
        let mut stack = format!("{}: {self}\n    at {self:?}", self.kind());
        let mut source = self.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {cause}"));
            source = cause.source();
        }
        stack
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

// -- Report & rendering -------------------------------------------------------

/// Everything the normalization layer needs, carried in the response
/// extensions from the point of failure.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Translated error.
    pub error: OperationalError,
    /// Short machine-readable name, see [`AppError::kind`].
    pub kind: &'static str,
    /// Untranslated message.
    pub raw_message: String,
    /// Diagnostic chain, shown only in development.
    pub stack: String,
}

impl From<&AppError> for ErrorReport {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.to_operational(),
            kind: err.kind(),
            raw_message: err.to_string(),
            stack: err.diagnostic_chain(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = ErrorReport::from(&self);
        // Safe default when no normalization layer is installed.
        let mut response = production_api_response(&report.error);
        response.extensions_mut().insert(report);
        response
    }
}

/// Which surface a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// JSON API under `/api`.
    Api,
    /// Server-rendered pages.
    Page,
}

impl Channel {
    /// Classify by the original request path.
    pub fn for_path(path: &str) -> Self {
        if path.starts_with("/api") {
            Self::Api
        } else {
            Self::Page
        }
    }
}

/// Terminal error middleware.
///
/// Passes successful responses through untouched. A response carrying an
/// [`ErrorReport`] gets a new status and body for the environment and
/// channel; its other headers (cookies, rate-limit counters, CORS) are kept.
pub async fn normalize_errors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let channel = Channel::for_path(request.uri().path());
    let uri = request.uri().clone();
    let mut response = next.run(request).await;
    let report = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => report,
        // Known path, no handler for the method: rendered like any unmatched route.
        None if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
            response = AppError::unmatched(&uri).into_response();
            match response.extensions_mut().remove::<ErrorReport>() {
                Some(report) => report,
                None => return response,
            }
        }
        None => return response,
    };

    let rendered = render_report(
        &report,
        state.config.environment,
        channel,
        state.renderer.as_ref(),
    );
    let (mut parts, _) = response.into_parts();
    let (rendered_parts, body) = rendered.into_parts();
    parts.status = rendered_parts.status;
    parts.headers.remove(header::CONTENT_LENGTH);
    if let Some(content_type) = rendered_parts.headers.get(header::CONTENT_TYPE) {
        parts.headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    Response::from_parts(parts, body)
}

/// Render a report for an environment and channel.
pub fn render_report(
    report: &ErrorReport,
    environment: Environment,
    channel: Channel,
    renderer: &dyn PageRenderer,
) -> Response {
    let err = &report.error;
    if err.is_operational {
        tracing::debug!(
            kind = report.kind,
            status = err.status_code.as_u16(),
            message = %err.message,
            "request failed"
        );
    } else {
        tracing::error!(
            kind = report.kind,
            message = %report.raw_message,
            stack = %report.stack,
            "unhandled error"
        );
    }

    match (environment, channel) {
        (Environment::Development, Channel::Api) => {
            let body = json!({
                "status": err.status,
                "error": {
                    "kind": report.kind,
                    "statusCode": err.status_code.as_u16(),
                    "status": err.status,
                    "isOperational": err.is_operational,
                },
                "message": report.raw_message,
                "stack": report.stack,
            });
            (err.status_code, Json(body)).into_response()
        }
        (Environment::Development, Channel::Page) => {
            error_page(renderer, err.status_code, &report.raw_message)
        }
        (Environment::Production, Channel::Api) => production_api_response(err),
        (Environment::Production, Channel::Page) if err.is_operational => {
            error_page(renderer, err.status_code, &err.message)
        }
        (Environment::Production, Channel::Page) => error_page(
            renderer,
            StatusCode::INTERNAL_SERVER_ERROR,
            GENERIC_PAGE_MESSAGE,
        ),
    }
}

fn production_api_response(err: &OperationalError) -> Response {
    if err.is_operational {
        (
            err.status_code,
            Json(json!({ "status": err.status, "message": err.message })),
        )
            .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": GENERIC_API_MESSAGE })),
        )
            .into_response()
    }
}

fn error_page(renderer: &dyn PageRenderer, status: StatusCode, msg: &str) -> Response {
    let context = json!({ "title": ERROR_PAGE_TITLE, "msg": msg });
    match renderer.render("error", &context) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to render error page");
            (status, format!("{ERROR_PAGE_TITLE} {msg}")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::HtmlRenderer;
    use http_body_util::BodyExt;
    use proptest::prelude::*;
    use tourbook_core::ValidationErrors;

    async fn body_of(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn json_of(response: Response) -> (StatusCode, serde_json::Value) {
        let (status, text) = body_of(response).await;
        (status, serde_json::from_str(&text).unwrap())
    }

    fn render(err: AppError, env: Environment, channel: Channel) -> Response {
        render_report(&ErrorReport::from(&err), env, channel, &HtmlRenderer)
    }

    #[test]
    fn status_and_classification() {
        let cases = [
            (AppError::Unauthenticated("x".into()), 401, "fail"),
            (AppError::Forbidden("x".into()), 403, "fail"),
            (AppError::NotFound("x".into()), 404, "fail"),
            (AppError::BadRequest("x".into()), 400, "fail"),
            (AppError::TooManyRequests("x".into()), 429, "fail"),
            (AppError::ServiceFailure("x".into()), 500, "error"),
            (AppError::Internal("x".into()), 500, "error"),
        ];
        for (err, code, status) in cases {
            let op = err.to_operational();
            assert_eq!(op.status_code.as_u16(), code, "{err:?}");
            assert_eq!(op.status.as_str(), status, "{err:?}");
        }
    }

    #[test]
    fn only_internal_faults_are_non_operational() {
        assert!(!AppError::Internal("x".into()).to_operational().is_operational);
        assert!(!AppError::Token(TokenError::Signing("x".into()))
            .to_operational()
            .is_operational);
        assert!(AppError::ServiceFailure("x".into()).to_operational().is_operational);
    }

    #[test]
    fn invalid_id_translation() {
        let err = AppError::from(StoreError::InvalidId {
            path: "id".into(),
            value: "abc".into(),
        });
        let op = err.to_operational();
        assert_eq!(op.status_code, StatusCode::BAD_REQUEST);
        assert_eq!(op.message, "Invalid id: abc");
        assert_eq!(err.kind(), "InvalidId");
    }

    #[test]
    fn duplicate_translation() {
        let err = AppError::from(StoreError::Duplicate {
            field: "email".into(),
            value: "a@b.io".into(),
        });
        assert_eq!(
            err.to_operational().message,
            "Duplicate field value: a@b.io. Please use another value."
        );
    }

    #[test]
    fn validation_translation_joins_messages() {
        let mut errors = ValidationErrors::new();
        errors.push("name", "A tour must have a name");
        errors.push("price", "A tour must have a price");
        let op = AppError::from(StoreError::from(errors)).to_operational();
        assert_eq!(
            op.message,
            "Invalid input data: A tour must have a name. A tour must have a price"
        );
        assert_eq!(op.status_code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn token_translation() {
        let invalid = AppError::from(TokenError::Invalid("bad signature".into())).to_operational();
        assert_eq!(invalid.status_code, StatusCode::UNAUTHORIZED);
        assert_eq!(
            invalid.message,
            "Invalid login credentials/token. Please login again."
        );
        let expired = AppError::from(TokenError::Expired).to_operational();
        assert_eq!(expired.status_code, StatusCode::UNAUTHORIZED);
        assert_eq!(expired.message, "Your session has expired. Please login again.");
    }

    #[tokio::test]
    async fn production_api_operational_shape() {
        let response = render(
            AppError::NotFound("Unable to find /api/v1/nope".into()),
            Environment::Production,
            Channel::Api,
        );
        let (status, body) = json_of(response).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            body,
            json!({ "status": "fail", "message": "Unable to find /api/v1/nope" })
        );
    }

    #[tokio::test]
    async fn production_api_masks_programming_faults() {
        let response = render(
            AppError::Internal("db connection reset".into()),
            Environment::Production,
            Channel::Api,
        );
        let (status, body) = json_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body,
            json!({ "status": "error", "message": "Something went wrong" })
        );
    }

    #[tokio::test]
    async fn development_api_includes_stack_and_raw_message() {
        let response = render(
            AppError::from(StoreError::InvalidId {
                path: "id".into(),
                value: "abc".into(),
            }),
            Environment::Development,
            Channel::Api,
        );
        let (status, body) = json_of(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["error"]["statusCode"], 400);
        assert_eq!(body["error"]["isOperational"], true);
        assert_eq!(body["error"]["kind"], "InvalidId");
        assert!(body["message"].as_str().unwrap().contains("cast to id failed"));
        assert!(body["stack"].as_str().unwrap().starts_with("InvalidId"));
    }

    #[tokio::test]
    async fn development_api_shows_internal_detail() {
        let response = render(
            AppError::Internal("db connection reset".into()),
            Environment::Development,
            Channel::Api,
        );
        let (status, body) = json_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "db connection reset");
        assert_eq!(body["error"]["isOperational"], false);
        assert!(body.get("stack").is_some());
    }

    #[tokio::test]
    async fn production_page_operational_message() {
        let response = render(
            AppError::NotFound("There is no tour with that name.".into()),
            Environment::Production,
            Channel::Page,
        );
        let (status, html) = body_of(response).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(html.contains(ERROR_PAGE_TITLE));
        assert!(html.contains("There is no tour with that name."));
    }

    #[tokio::test]
    async fn production_page_masks_programming_faults() {
        let response = render(
            AppError::Internal("secret detail".into()),
            Environment::Production,
            Channel::Page,
        );
        let (status, html) = body_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(html.contains(GENERIC_PAGE_MESSAGE));
        assert!(!html.contains("secret detail"));
    }

    #[tokio::test]
    async fn development_page_shows_raw_message() {
        let response = render(
            AppError::Internal("secret detail".into()),
            Environment::Development,
            Channel::Page,
        );
        let (_, html) = body_of(response).await;
        assert!(html.contains("secret detail"));
    }

    #[tokio::test]
    async fn into_response_attaches_report_and_safe_default() {
        let response = AppError::Internal("boom".into()).into_response();
        assert!(response.extensions().get::<ErrorReport>().is_some());
        let (status, body) = json_of(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], GENERIC_API_MESSAGE);
    }

    #[test]
    fn channel_by_path_prefix() {
        assert_eq!(Channel::for_path("/api/v1/tours"), Channel::Api);
        assert_eq!(Channel::for_path("/tour/the-forest-hiker"), Channel::Page);
        assert_eq!(Channel::for_path("/"), Channel::Page);
    }

    proptest! {
        #[test]
        fn classification_matches_code(code in 400u16..600) {
            let status = StatusCode::from_u16(code).unwrap();
            let op = OperationalError::new("x", status);
            let expected = if code < 500 { ErrorStatus::Fail } else { ErrorStatus::Error };
            prop_assert_eq!(op.status, expected);
            prop_assert_eq!(ErrorStatus::for_code(status), expected);
        }
    }
}
