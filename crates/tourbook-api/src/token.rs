//! # Session Tokens
//!
//! Issues and verifies the signed session credential, and builds the cookie
//! that carries it between browser and server.
//!
//! ## Token Format
//!
//! HS256 JWT with claims `{ id, iat, exp }`: the subject's user id, the
//! issue time, and the expiry (both unix seconds). Nothing is stored
//! server-side; a token stops being accepted when it expires or when its
//! subject changes password after `iat`.
//!
//! ## Cookie Transport
//!
//! The `jwt` cookie is `HttpOnly`, `SameSite=Lax`, scoped to `/`, and
//! `Secure` whenever the request arrived over TLS, either directly or
//! through a proxy that sets `X-Forwarded-Proto: https`.

use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tower_cookies::cookie::SameSite;
use tower_cookies::Cookie;
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "jwt";

/// Value written over the session cookie on logout.
pub const LOGGED_OUT: &str = "logged out";

/// Seconds the logout cookie survives.
const LOGOUT_COOKIE_SECS: i64 = 10;

// -- Claims & errors ----------------------------------------------------------

/// Verified token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The user the token was issued to.
    #[serde(rename = "id")]
    pub subject_id: Uuid,
    /// Issue time, unix seconds.
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expiry, unix seconds.
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

/// Token failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed token or bad signature.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Well-formed and correctly signed, but past its expiry.
    #[error("jwt expired")]
    Expired,

    /// The signer rejected the claims. Never caused by client input.
    #[error("token signing failed: {0}")]
    Signing(String),
}

// -- Service ------------------------------------------------------------------

/// Signs and verifies session tokens.
pub trait TokenService: Send + Sync {
    /// Produce a token for `subject_id`, valid from now for the configured
    /// window.
    fn issue(&self, subject_id: Uuid) -> Result<String, TokenError>;

    /// Check signature and expiry, returning the embedded claims.
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

/// HS256 implementation of [`TokenService`].
pub struct JwtTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for JwtTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenService")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl JwtTokenService {
    /// Build a service signing with `secret`; tokens live for `ttl`.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, subject_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let expires = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| TokenError::Signing(format!("lifetime {} overflows", self.ttl)))?;
        let claims = Claims {
            subject_id,
            issued_at: now.timestamp(),
            expires_at: expires.timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }
}

// -- Cookie transport ---------------------------------------------------------

/// The session cookie carrying `token`, expiring `days` from now. A
/// lifetime past the calendar's range yields a browser-session cookie.
pub fn session_cookie(token: String, days: i64, secure: bool) -> Cookie<'static> {
    let expires = OffsetDateTime::now_utc()
        .checked_add(time::Duration::seconds(days.saturating_mul(86_400)));
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .expires(expires)
        .build()
}

/// The short-lived placeholder written over the session cookie on logout.
pub fn logout_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, LOGGED_OUT))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(secure)
        .expires(OffsetDateTime::now_utc() + time::Duration::seconds(LOGOUT_COOKIE_SECS))
        .build()
}

/// Whether the request reached us over TLS.
pub fn is_secure_connection(uri: &Uri, headers: &HeaderMap) -> bool {
    if uri.scheme_str() == Some("https") {
        return true;
    }
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}

/// Extractor reporting whether the request arrived over TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureTransport(pub bool);

impl SecureTransport {
    /// URL scheme matching the transport.
    pub fn scheme(&self) -> &'static str {
        if self.0 {
            "https"
        } else {
            "http"
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SecureTransport {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(is_secure_connection(&parts.uri, &parts.headers)))
    }
}
