//! # Security Headers
//!
//! Stamps a content security policy and the usual browser hardening headers
//! onto every response, API and rendered pages alike. Headers a handler has
//! already set are left alone.
//!
//! The default policy allows the map and payment scripts the tour pages
//! load (Mapbox, Stripe, cdnjs) and nothing else off-origin.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

/// Policy for the tour site.
pub const DEFAULT_CSP: &str = "default-src 'self' https://api.mapbox.com https://events.mapbox.com; \
     base-uri 'self'; \
     font-src 'self' https: data:; \
     form-action 'self'; \
     frame-ancestors 'self'; \
     frame-src 'self' https://js.stripe.com; \
     img-src 'self' data:; \
     object-src 'none'; \
     script-src 'self' blob: https://api.mapbox.com https://cdnjs.cloudflare.com https://js.stripe.com; \
     script-src-attr 'none'; \
     style-src 'self' https: 'unsafe-inline'; \
     upgrade-insecure-requests";

/// The header set applied to every response. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        Self::with_csp(HeaderValue::from_static(DEFAULT_CSP))
    }
}

impl SecurityHeaders {
    /// The standard set with a custom content security policy.
    pub fn with_csp(csp: HeaderValue) -> Self {
        let headers = vec![
            (header::CONTENT_SECURITY_POLICY, csp),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("cross-origin-resource-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("origin-agent-cluster"),
                HeaderValue::from_static("?1"),
            ),
            (header::REFERRER_POLICY, HeaderValue::from_static("no-referrer")),
            (
                header::STRICT_TRANSPORT_SECURITY,
                HeaderValue::from_static("max-age=15552000; includeSubDomains"),
            ),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("off")),
            (
                HeaderName::from_static("x-download-options"),
                HeaderValue::from_static("noopen"),
            ),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN")),
            (
                HeaderName::from_static("x-permitted-cross-domain-policies"),
                HeaderValue::from_static("none"),
            ),
            (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
        ];
        Self {
            headers: Arc::new(headers),
        }
    }

    /// Insert every header the response does not already carry.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in self.headers.iter() {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers.remove("x-powered-by");
    }
}

/// Axum middleware applying [`SecurityHeaders`] to the response.
pub async fn security_headers_middleware(
    State(config): State<SecurityHeaders>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    config.apply(response.headers_mut());
    response
}
