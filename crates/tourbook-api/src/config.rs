//! # Application Configuration
//!
//! Built once at startup from environment variables (after `.env` is loaded
//! by `main`) and passed into [`AppState`](crate::state::AppState). Nothing
//! downstream reads the environment directly.
//!
//! | Variable                 | Default        |
//! |--------------------------|----------------|
//! | `APP_ENV`                | `development`  |
//! | `PORT`                   | `3000`         |
//! | `JWT_SECRET`             | required       |
//! | `JWT_EXPIRES_IN`         | `90d`          |
//! | `JWT_COOKIE_EXPIRES_IN`  | `90` (days)    |
//! | `RATE_LIMIT_MAX`         | `100`          |
//! | `RATE_LIMIT_WINDOW_SECS` | `3600`         |
//! | `DATABASE_URL`           | unset          |
//!
//! Both session lifetimes are capped at [`MAX_SESSION_DAYS`].

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

use crate::middleware::rate_limit::RateLimitConfig;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_JWT_EXPIRES_IN: &str = "90d";
const DEFAULT_COOKIE_DAYS: i64 = 90;

/// Longest accepted session lifetime, for both the token and the cookie.
pub const MAX_SESSION_DAYS: i64 = 3650;

/// Deployment environment. Selects the error rendering policy and log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Verbose errors with diagnostic chains.
    #[default]
    Development,
    /// Operational messages only; programming faults are masked.
    Production,
}

impl Environment {
    /// Return the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// Whether this is the production environment.
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::Invalid {
                var: "APP_ENV",
                value: s.to_string(),
                reason: "expected development or production".to_string(),
            }),
        }
    }
}

/// Configuration loading failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is present but unusable.
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// The rejected raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Application configuration.
///
/// Custom `Debug` redacts the signing secret and the database URL (which
/// usually embeds a password).
#[derive(Clone)]
pub struct AppConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// HS256 signing secret for session tokens.
    pub jwt_secret: String,
    /// Validity window of a session token.
    pub jwt_expires_in: Duration,
    /// Lifetime of the session cookie, in days.
    pub jwt_cookie_expires_in_days: i64,
    /// Limits applied to `/api` routes.
    pub rate_limit: RateLimitConfig,
    /// Postgres connection string. `None` runs in-memory only.
    pub database_url: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("port", &self.port)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_expires_in", &self.jwt_expires_in)
            .field(
                "jwt_cookie_expires_in_days",
                &self.jwt_cookie_expires_in_days,
            )
            .field("rate_limit", &self.rate_limit)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl AppConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(environment: Environment, jwt_secret: impl Into<String>) -> Self {
        Self {
            environment,
            port: DEFAULT_PORT,
            jwt_secret: jwt_secret.into(),
            jwt_expires_in: Duration::days(90),
            jwt_cookie_expires_in_days: DEFAULT_COOKIE_DAYS,
            rate_limit: RateLimitConfig::default(),
            database_url: None,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV") {
            Some(raw) => raw.parse()?,
            None => Environment::default(),
        };

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET",
                value: "[REDACTED]".to_string(),
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }

        let raw_expiry = get("JWT_EXPIRES_IN").unwrap_or_else(|| DEFAULT_JWT_EXPIRES_IN.into());
        let jwt_expires_in = parse_duration(&raw_expiry).ok_or_else(|| ConfigError::Invalid {
            var: "JWT_EXPIRES_IN",
            value: raw_expiry.clone(),
            reason: format!("expected a positive <number>[s|m|h|d] of at most {MAX_SESSION_DAYS}d"),
        })?;

        let jwt_cookie_expires_in_days =
            parse_number(&get, "JWT_COOKIE_EXPIRES_IN", DEFAULT_COOKIE_DAYS)?;
        if !(1..=MAX_SESSION_DAYS).contains(&jwt_cookie_expires_in_days) {
            return Err(ConfigError::Invalid {
                var: "JWT_COOKIE_EXPIRES_IN",
                value: jwt_cookie_expires_in_days.to_string(),
                reason: format!("expected between 1 and {MAX_SESSION_DAYS} days"),
            });
        }

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: parse_number(&get, "RATE_LIMIT_MAX", defaults.max_requests)?,
            window_secs: parse_number(&get, "RATE_LIMIT_WINDOW_SECS", defaults.window_secs)?,
        };

        Ok(Self {
            environment,
            port: parse_number(&get, "PORT", DEFAULT_PORT)?,
            jwt_secret,
            jwt_expires_in,
            jwt_cookie_expires_in_days,
            rate_limit,
            database_url: get("DATABASE_URL"),
        })
    }
}

/// Parse a lifetime such as `90d`, `12h`, `30m`, `45s`, or a bare number
/// of seconds. Zero, negative and longer than [`MAX_SESSION_DAYS`] lifetimes
/// are rejected.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let n: i64 = digits.parse().ok()?;
    if n <= 0 {
        return None;
    }
    let unit_secs = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return None,
    };
    let secs = n.checked_mul(unit_secs)?;
    (secs <= MAX_SESSION_DAYS * 86_400).then(|| Duration::seconds(secs))
}

fn parse_number<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: "expected a number".to_string(),
        }),
    }
}
