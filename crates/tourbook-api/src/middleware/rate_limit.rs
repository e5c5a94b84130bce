//! # Per-Client Rate Limiting
//!
//! Fixed-window request counter keyed by client IP, applied to every
//! `/api` route. In-memory only; each process counts independently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;

use crate::error::AppError;

/// Message returned once a client exhausts its window.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests from this IP. Please try again in an hour";

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60 * 60,
        }
    }
}

/// Per-key rate limit state.
#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count a request from `key`. Returns the remaining allowance, or
    /// `None` if the window is exhausted.
    pub fn check(&self, key: &str) -> Option<u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Option<u64> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.duration_since(bucket.window_start).as_secs() >= self.config.window_secs {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            None
        } else {
            bucket.count += 1;
            Some(self.config.max_requests - bucket.count)
        }
    }
}

/// Middleware that enforces per-client rate limits.
///
/// The key is the first address in `X-Forwarded-For` (the service runs
/// behind a proxy in production), then the socket peer address, then
/// `"unknown"`.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let key = client_key(request.headers(), peer);

    let Some(remaining) = limiter.check(&key) else {
        tracing::warn!(client = %key, "rate limit exceeded");
        return Err(AppError::TooManyRequests(RATE_LIMIT_MESSAGE.to_string()));
    };

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limiter.config.max_requests));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    Ok(response)
}

fn client_key(headers: &HeaderMap, peer: Option<String>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or(peer)
        .unwrap_or_else(|| "unknown".to_string())
}
