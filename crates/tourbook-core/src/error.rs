//! # Error Hierarchy
//!
//! Structured error types for the domain records, built with `thiserror`.
//!
//! [`StoreError`] carries the raw shapes a document store reports. Its
//! `Display` output is the diagnostic text an operator sees; the API layer
//! derives the user-facing message from the structured fields instead.

use std::fmt;

use thiserror::Error;

/// A single failed field rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct FieldError {
    /// Name of the offending field, as it appears in request bodies.
    pub field: String,
    /// Human-readable explanation of the rule that failed.
    pub message: String,
}

/// An ordered collection of field rule failures.
///
/// Empty collections are valid values; [`ValidationErrors::into_result`]
/// turns the collection into `Ok(())` when nothing failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `field`.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Whether no rule failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over the recorded failures in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// The human-readable messages, in insertion order.
    pub fn messages(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.message.as_str()).collect()
    }

    /// Whether a failure was recorded for `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Raw persistence failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A path parameter or reference could not be parsed as a record id.
    #[error("cast to id failed for value \"{value}\" at path \"{path}\"")]
    InvalidId {
        /// Field or path parameter that carried the value.
        path: String,
        /// The rejected raw value.
        value: String,
    },

    /// A unique field already holds this value in another record.
    #[error("duplicate key error: {field} \"{value}\"")]
    Duplicate {
        /// The unique field.
        field: String,
        /// The value that collided.
        value: String,
    },

    /// One or more field rules failed.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

/// Password hashing failures.
///
/// These are never caused by user input; the API layer treats them as
/// internal faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// The argon2 hasher rejected its parameters or input.
    #[error("password hashing failed: {0}")]
    Hash(String),
}
