//! # Custom Extractors
//!
//! Helpers that turn extractor rejections and raw path segments into
//! [`AppError`]s, so handlers can use `?` on them.

use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::{Form, Json};
use tourbook_core::parse_id;
use uuid::Uuid;

use crate::error::AppError;

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// Handlers take the extractor result and unwrap it here:
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
///     // use req...
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a urlencoded form body, mapping rejections to [`AppError::BadRequest`].
pub fn extract_form<T>(result: Result<Form<T>, FormRejection>) -> Result<T, AppError> {
    result
        .map(|Form(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Parse a record id taken from the URL.
///
/// A malformed id is reported as `Invalid {path}: {value}` (400), not as a
/// missing record.
pub fn path_id(path: &str, raw: &str) -> Result<Uuid, AppError> {
    Ok(parse_id(path, raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn path_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(path_id("id", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn path_id_rejects_garbage_as_bad_request() {
        let err = path_id("id", "not-an-id").unwrap_err();
        let op = err.to_operational();
        assert_eq!(op.status_code, StatusCode::BAD_REQUEST);
        assert_eq!(op.message, "Invalid id: not-an-id");
    }

    #[test]
    fn extract_json_passes_value_through() {
        let value = extract_json(Ok(Json(7u8))).unwrap();
        assert_eq!(value, 7);
    }
}
