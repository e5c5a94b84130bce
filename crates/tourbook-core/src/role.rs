//! # Roles
//!
//! Access levels attached to every user. Routes bind an explicit allow-list
//! of roles at registration time; there is no implied hierarchy, so an
//! `admin` is only admitted where `admin` is listed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A user's role.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// A customer: books tours and writes reviews.
    #[default]
    User,
    /// Accompanies tours.
    Guide,
    /// Leads tours and manages the tour catalogue.
    LeadGuide,
    /// Full administrative access.
    Admin,
}

impl Role {
    /// Return the wire representation of this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Guide => "guide",
            Self::LeadGuide => "lead-guide",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
