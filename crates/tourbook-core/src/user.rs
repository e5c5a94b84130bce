//! # Users
//!
//! The credential-bearing record behind every session, plus the drafts
//! used to create and edit it.
//!
//! ## Credential Lifecycle
//!
//! - Passwords are hashed with argon2 (PHC string format) and never
//!   serialized into API responses; [`PublicUser`] is the outward view.
//! - Changing a password stamps `password_changed_at` one second in the
//!   past. Session tokens issued before that instant are rejected by the
//!   authentication middleware; tokens issued immediately after the change
//!   (same second) stay valid.
//! - Password reset tokens are 32 random bytes, hex-encoded. Only their
//!   SHA-256 digest is stored, valid for ten minutes.

use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{PasswordError, ValidationErrors};
use crate::role::Role;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Lifetime of a password reset token.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

/// Photo assigned to users who never uploaded one.
pub const DEFAULT_PHOTO: &str = "default.jpg";

fn default_photo() -> String {
    DEFAULT_PHOTO.to_string()
}

fn default_active() -> bool {
    true
}

// -- Stored record ------------------------------------------------------------

/// A stored user.
///
/// Serializes every field (including the password hash) because this is the
/// persisted shape. Use [`UserRecord::public`] for responses. The `Debug`
/// impl redacts credential material.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Record id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Login email, lower-cased and trimmed. Unique across users.
    pub email: String,
    /// Profile photo file name.
    #[serde(default = "default_photo")]
    pub photo: String,
    /// Access role.
    #[serde(default)]
    pub role: Role,
    /// argon2 PHC string.
    pub password_hash: String,
    /// When the password last changed; `None` if never changed since signup.
    #[serde(default)]
    pub password_changed_at: Option<DateTime<Utc>>,
    /// SHA-256 hex digest of the outstanding reset token.
    #[serde(default)]
    pub password_reset_digest: Option<String>,
    /// Expiry of the outstanding reset token.
    #[serde(default)]
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    /// Deactivated accounts are invisible to lookups.
    #[serde(default = "default_active")]
    pub active: bool,
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("photo", &self.photo)
            .field("role", &self.role)
            .field("password_hash", &"[REDACTED]")
            .field("password_changed_at", &self.password_changed_at)
            .field(
                "password_reset_digest",
                &self.password_reset_digest.as_ref().map(|_| "[REDACTED]"),
            )
            .field("password_reset_expires_at", &self.password_reset_expires_at)
            .field("active", &self.active)
            .finish()
    }
}

impl UserRecord {
    /// Build a new active `user`-role record, hashing `password`.
    ///
    /// Callers validate the draft first; this only normalizes and hashes.
    pub fn new(
        name: &str,
        email: &str,
        photo: Option<String>,
        password: &str,
    ) -> Result<Self, PasswordError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email: normalize_email(email),
            photo: photo
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(default_photo),
            role: Role::User,
            password_hash: hash_password(password)?,
            password_changed_at: None,
            password_reset_digest: None,
            password_reset_expires_at: None,
            active: true,
        })
    }

    /// The outward-facing view of this user.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            photo: self.photo.clone(),
            role: self.role,
        }
    }

    /// Check a candidate password against the stored hash.
    pub fn correct_password(&self, candidate: &str) -> bool {
        verify_password(candidate, &self.password_hash)
    }

    /// Whether the password changed strictly after `issued_at` (unix seconds).
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map(|changed| changed.timestamp() > issued_at)
            .unwrap_or(false)
    }

    /// Install a new password hash (from [`hash_password`]), stamp the
    /// change time, and drop any outstanding reset token.
    pub fn replace_password_hash(&mut self, password_hash: String, now: DateTime<Utc>) {
        self.password_hash = password_hash;
        self.password_changed_at = Some(now - Duration::seconds(1));
        self.clear_password_reset();
    }

    /// Generate a reset token, store its digest with a ten-minute expiry,
    /// and return the plain token for delivery.
    pub fn create_password_reset_token(&mut self, now: DateTime<Utc>) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.password_reset_digest = Some(reset_token_digest(&token));
        self.password_reset_expires_at = Some(now + Duration::minutes(RESET_TOKEN_TTL_MINUTES));
        token
    }

    /// Forget any outstanding reset token.
    pub fn clear_password_reset(&mut self) {
        self.password_reset_digest = None;
        self.password_reset_expires_at = None;
    }

    /// Whether `digest` is the outstanding, unexpired reset token digest.
    pub fn reset_token_matches(&self, digest: &str, now: DateTime<Utc>) -> bool {
        match (&self.password_reset_digest, self.password_reset_expires_at) {
            (Some(stored), Some(expires)) => stored == digest && expires > now,
            _ => false,
        }
    }

    /// Apply a partial update, re-validating the touched fields.
    pub fn apply(&mut self, patch: UserPatch) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(ref name) = patch.name {
            if name.trim().is_empty() {
                errors.push("name", "Please tell us your name!");
            }
        }
        if let Some(ref email) = patch.email {
            check_email(email, &mut errors);
        }
        errors.into_result()?;

        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = patch.email {
            self.email = normalize_email(&email);
        }
        if let Some(photo) = patch.photo {
            self.photo = photo;
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
        Ok(())
    }
}

// -- Views and drafts ---------------------------------------------------------

/// The outward-facing view of a user. Carries no credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    /// Record id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Profile photo file name.
    pub photo: String,
    /// Access role.
    pub role: Role,
}

/// Signup payload.
///
/// Only these fields are read from the request body. Anything else the
/// client sends (`role`, `passwordChangedAt`, `active`, ...) is ignored, so
/// signup always creates a plain `user`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Login email.
    #[serde(default)]
    pub email: String,
    /// Plain password.
    #[serde(default)]
    pub password: String,
    /// Must equal `password`.
    #[serde(default)]
    pub password_confirm: String,
    /// Optional profile photo file name.
    #[serde(default)]
    pub photo: Option<String>,
}

impl NewUser {
    /// Check every field rule, collecting all failures.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.name.trim().is_empty() {
            errors.push("name", "Please tell us your name!");
        }
        check_email(&self.email, &mut errors);
        let pair = validate_password_pair(&self.password, &self.password_confirm);
        for err in pair.iter() {
            errors.push(err.field.clone(), err.message.clone());
        }
        errors.into_result()
    }
}

/// Partial update of a user record.
///
/// Admin updates may set every field here; the self-service profile route
/// only forwards `name` and `email`. Passwords are never updated through
/// this type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    /// New display name.
    pub name: Option<String>,
    /// New login email.
    pub email: Option<String>,
    /// New profile photo file name.
    pub photo: Option<String>,
    /// New role.
    pub role: Option<Role>,
    /// Activate or deactivate the account.
    pub active: Option<bool>,
}

// -- Free functions -----------------------------------------------------------

/// Validate a password and its confirmation.
pub fn validate_password_pair(password: &str, confirm: &str) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if password.is_empty() {
        errors.push("password", "Please provide a password");
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(
            "password",
            format!("A password must have at least {MIN_PASSWORD_LEN} characters"),
        );
    }
    if confirm.is_empty() {
        errors.push("passwordConfirm", "Please confirm your password");
    } else if confirm != password {
        errors.push("passwordConfirm", "Passwords are not the same!");
    }
    errors
}

/// Hash a password with argon2 and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a password against a PHC string. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// SHA-256 hex digest of a plain reset token.
pub fn reset_token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str, errors: &mut ValidationErrors) {
    let email = email.trim();
    if email.is_empty() {
        errors.push("email", "Please provide your email");
    } else if !is_valid_email(email) {
        errors.push("email", "Please provide a valid email");
    }
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
