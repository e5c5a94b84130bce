//! # Reviews
//!
//! A user's rating of a tour. Each user may review a given tour once; the
//! API layer enforces that uniqueness and recomputes the tour's rating
//! aggregates with [`rating_stats`] after every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, ValidationErrors};
use crate::id::parse_id;
use crate::tour::DEFAULT_RATING;

/// A stored review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    /// Record id.
    pub id: Uuid,
    /// Review text.
    pub review: String,
    /// Rating between 1 and 5.
    pub rating: f64,
    /// Reviewed tour.
    pub tour: Uuid,
    /// Author.
    pub user: Uuid,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Create or partial-update payload for a review.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDraft {
    /// Review text.
    pub review: Option<String>,
    /// Rating between 1 and 5.
    pub rating: Option<f64>,
    /// Reviewed tour id.
    pub tour: Option<String>,
    /// Author id.
    pub user: Option<String>,
}

impl ReviewRecord {
    /// Build a review from a draft.
    pub fn create(draft: ReviewDraft, now: DateTime<Utc>) -> Result<Self, StoreError> {
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
        let review = draft
            .review
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if review.is_none() {
            errors.push("review", "Review can not be empty!");
        }
        match draft.rating {
            None => errors.push("rating", "A review must have a rating"),
            Some(r) => check_rating(r, &mut errors),
        }
        if tour.is_none() {
            errors.push("tour", "Review must belong to a tour.");
        }
        if user.is_none() {
            errors.push("user", "Review must belong to a user");
        }

        let (Some(review), Some(rating), Some(tour), Some(user), true) =
            (review, draft.rating, tour, user, errors.is_empty())
        else {
            return Err(errors.into());
        };

        Ok(Self {
            id: Uuid::new_v4(),
            review,
            rating,
            tour,
            user,
            created_at: now,
        })
    }

    /// Merge the text and rating from `patch`. Ownership fields never change.
    pub fn apply(&mut self, patch: ReviewDraft) -> Result<(), StoreError> {
        let mut errors = ValidationErrors::new();
        let review = patch.review.map(|r| r.trim().to_string());
        if matches!(review.as_deref(), Some("")) {
            errors.push("review", "Review can not be empty!");
        }
        if let Some(r) = patch.rating {
            check_rating(r, &mut errors);
        }
        errors.into_result()?;

        if let Some(review) = review {
            self.review = review;
        }
        if let Some(rating) = patch.rating {
            self.rating = rating;
        }
        Ok(())
    }
}

/// Review count and mean rating for a set of reviews.
///
/// An empty set yields `(0, DEFAULT_RATING)`, which is what a tour shows
/// before anyone reviews it.
pub fn rating_stats<'a>(reviews: impl IntoIterator<Item = &'a ReviewRecord>) -> (u32, f64) {
    let (count, sum) = reviews
        .into_iter()
        .fold((0u32, 0.0f64), |(n, sum), r| (n + 1, sum + r.rating));
    if count == 0 {
        (0, DEFAULT_RATING)
    } else {
        (count, sum / f64::from(count))
    }
}

fn check_rating(rating: f64, errors: &mut ValidationErrors) {
    if !(1.0..=5.0).contains(&rating) {
        errors.push("rating", "Rating must be between 1 and 5");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ReviewDraft {
        ReviewDraft {
            review: Some("Unforgettable trip".into()),
            rating: Some(5.0),
            tour: Some(Uuid::new_v4().to_string()),
            user: Some(Uuid::new_v4().to_string()),
        }
    }

    #[test]
    fn create_valid_review() {
        let review = ReviewRecord::create(draft(), Utc::now()).unwrap();
        assert_eq!(review.rating, 5.0);
        assert_eq!(review.review, "Unforgettable trip");
    }

    #[test]
    fn create_requires_text_owner_and_tour() {
        let err = ReviewRecord::create(
            ReviewDraft {
                rating: Some(9.0),
                ..ReviewDraft::default()
            },
            Utc::now(),
        )
        .unwrap_err();
        let StoreError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("review"));
        assert!(errors.has_field("rating"));
        assert!(errors.has_field("tour"));
        assert!(errors.has_field("user"));
    }

    #[test]
    fn create_rejects_malformed_tour_id() {
        let mut d = draft();
        d.tour = Some("xyz".into());
        let err = ReviewRecord::create(d, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidId { ref path, .. } if path == "tour"));
    }

    #[test]
    fn apply_keeps_owner() {
        let mut review = ReviewRecord::create(draft(), Utc::now()).unwrap();
        let (tour, user) = (review.tour, review.user);
        review
            .apply(ReviewDraft {
                rating: Some(3.0),
                tour: Some(Uuid::new_v4().to_string()),
                ..ReviewDraft::default()
            })
            .unwrap();
        assert_eq!(review.rating, 3.0);
        assert_eq!((review.tour, review.user), (tour, user));
    }

    #[test]
    fn apply_rejects_out_of_range_rating() {
        let mut review = ReviewRecord::create(draft(), Utc::now()).unwrap();
        assert!(review
            .apply(ReviewDraft {
                rating: Some(0.5),
                ..ReviewDraft::default()
            })
            .is_err());
        assert_eq!(review.rating, 5.0);
    }

    #[test]
    fn stats_default_and_mean() {
        assert_eq!(rating_stats(&Vec::<ReviewRecord>::new()), (0, DEFAULT_RATING));
        let mut a = ReviewRecord::create(draft(), Utc::now()).unwrap();
        let mut b = a.clone();
        a.rating = 4.0;
        b.rating = 5.0;
        assert_eq!(rating_stats(&[a, b]), (2, 4.5));
    }
}
