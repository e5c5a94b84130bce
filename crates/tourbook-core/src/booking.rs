//! # Bookings
//!
//! A paid reservation of a tour by a user. Bookings are normally created by
//! the checkout flow; administrators and lead guides may also create and
//! edit them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, ValidationErrors};
use crate::id::parse_id;

fn default_paid() -> bool {
    true
}

/// A stored booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    /// Record id.
    pub id: Uuid,
    /// Booked tour.
    pub tour: Uuid,
    /// Customer.
    pub user: Uuid,
    /// Price charged.
    pub price: f64,
    /// Whether the charge settled.
    #[serde(default = "default_paid")]
    pub paid: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Create or partial-update payload for a booking.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    /// Booked tour id.
    pub tour: Option<String>,
    /// Customer id.
    pub user: Option<String>,
    /// Price charged.
    pub price: Option<f64>,
    /// Whether the charge settled. Defaults to `true`.
    pub paid: Option<bool>,
}

impl BookingRecord {
    /// Build a booking from a draft.
    pub fn create(draft: BookingDraft, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let tour = draft
            .tour
            .as_deref()
            .map(|raw| parse_id("tour", raw))
            .transpose()?;
        let user = draft
            .user
            .as_deref()
            .map(|raw| parse_id("user", raw))
            .transpose()?;

        let mut errors = ValidationErrors::new();
        if tour.is_none() {
            errors.push("tour", "Booking must belong to a Tour!");
        }
        if user.is_none() {
            errors.push("user", "Booking must belong to a User!");
        }
        match draft.price {
            None => errors.push("price", "Booking must have a price."),
            Some(p) => check_price(p, &mut errors),
        }

        let (Some(tour), Some(user), Some(price), true) =
            (tour, user, draft.price, errors.is_empty())
        else {
            return Err(errors.into());
        };

        Ok(Self {
            id: Uuid::new_v4(),
            tour,
            user,
            price,
            paid: draft.paid.unwrap_or(true),
            created_at: now,
        })
    }

    /// Merge the fields present in `patch`. On failure the record is left
    /// untouched.
    pub fn apply(&mut self, patch: BookingDraft) -> Result<(), StoreError> {
        let tour = patch
            .tour
            .as_deref()
            .map(|raw| parse_id("tour", raw))
            .transpose()?;
        let user = patch
            .user
            .as_deref()
            .map(|raw| parse_id("user", raw))
            .transpose()?;
        let mut errors = ValidationErrors::new();
        if let Some(p) = patch.price {
            check_price(p, &mut errors);
        }
        errors.into_result()?;

        if let Some(tour) = tour {
            self.tour = tour;
        }
        if let Some(user) = user {
            self.user = user;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(paid) = patch.paid {
            self.paid = paid;
        }
        Ok(())
    }
}

fn check_price(price: f64, errors: &mut ValidationErrors) {
    if !price.is_finite() || price < 0.0 {
        errors.push("price", "A booking price cannot be negative");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> BookingDraft {
        BookingDraft {
            tour: Some(Uuid::new_v4().to_string()),
            user: Some(Uuid::new_v4().to_string()),
            price: Some(497.0),
            paid: None,
        }
    }

    #[test]
    fn create_defaults_to_paid() {
        let booking = BookingRecord::create(draft(), Utc::now()).unwrap();
        assert!(booking.paid);
        assert_eq!(booking.price, 497.0);
    }

    #[test]
    fn create_reports_missing_references() {
        let err = BookingRecord::create(BookingDraft::default(), Utc::now()).unwrap_err();
        let StoreError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            errors.messages(),
            vec![
                "Booking must belong to a Tour!",
                "Booking must belong to a User!",
                "Booking must have a price.",
            ]
        );
    }

    #[test]
    fn create_rejects_malformed_user_id() {
        let mut d = draft();
        d.user = Some("42".into());
        let err = BookingRecord::create(d, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidId { ref value, .. } if value == "42"));
    }

    #[test]
    fn apply_marks_unpaid_and_rejects_negative_price() {
        let mut booking = BookingRecord::create(draft(), Utc::now()).unwrap();
        booking
            .apply(BookingDraft {
                paid: Some(false),
                ..BookingDraft::default()
            })
            .unwrap();
        assert!(!booking.paid);

        let before = booking.clone();
        assert!(booking
            .apply(BookingDraft {
                price: Some(-1.0),
                paid: Some(true),
                ..BookingDraft::default()
            })
            .is_err());
        assert_eq!(booking, before);
    }
}
