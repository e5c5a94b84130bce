//! # Tours
//!
//! The catalogue record. A [`TourDraft`] is both the create payload and the
//! partial-update payload: creation requires the mandatory fields, updates
//! merge whatever is present and re-run every rule on the merged result.
//!
//! Secret tours (`secretTour: true`) are stored like any other tour but are
//! hidden from every listing and lookup by the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, ValidationErrors};
use crate::id::parse_ids;

/// Shortest accepted tour name, in characters.
pub const NAME_MIN_LEN: usize = 10;
/// Longest accepted tour name, in characters.
pub const NAME_MAX_LEN: usize = 40;
/// Rating assigned to a tour with no reviews.
pub const DEFAULT_RATING: f64 = 4.5;

const DIFFICULTY_MESSAGE: &str = "Difficulty is either: easy, medium, difficult";

/// How demanding a tour is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Suitable for everyone.
    Easy,
    /// Requires some fitness.
    Medium,
    /// Requires good fitness.
    Difficult,
}

impl Difficulty {
    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "difficult" => Some(Self::Difficult),
            _ => None,
        }
    }

    /// Return the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Difficult => "difficult",
        }
    }
}

fn point_kind() -> String {
    "Point".to_string()
}

/// A GeoJSON point with a human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Always `"Point"`.
    #[serde(rename = "type", default = "point_kind")]
    pub kind: String,
    /// `[longitude, latitude]`.
    #[serde(default)]
    pub coordinates: Vec<f64>,
    /// Street address.
    #[serde(default)]
    pub address: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A stop on the tour itinerary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourStop {
    /// Where the stop is.
    #[serde(flatten)]
    pub point: GeoPoint,
    /// Tour day on which the stop is visited.
    #[serde(default)]
    pub day: Option<u32>,
}

/// A stored tour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourRecord {
    /// Record id.
    pub id: Uuid,
    /// Unique display name.
    pub name: String,
    /// URL slug derived from `name`.
    pub slug: String,
    /// Length in days.
    pub duration: u32,
    /// Largest accepted group.
    pub max_group_size: u32,
    /// How demanding the tour is.
    pub difficulty: Difficulty,
    /// Mean review rating, one decimal.
    pub ratings_average: f64,
    /// Number of reviews.
    pub ratings_quantity: u32,
    /// Regular price.
    pub price: f64,
    /// Discounted price; always below `price`.
    #[serde(default)]
    pub price_discount: Option<f64>,
    /// One-line summary.
    pub summary: String,
    /// Long description.
    #[serde(default)]
    pub description: Option<String>,
    /// Cover image file name.
    pub image_cover: String,
    /// Gallery image file names.
    #[serde(default)]
    pub images: Vec<String>,
    /// Scheduled departures.
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    /// Hidden from listings and lookups.
    #[serde(default)]
    pub secret_tour: bool,
    /// Meeting point.
    #[serde(default)]
    pub start_location: Option<GeoPoint>,
    /// Itinerary.
    #[serde(default)]
    pub locations: Vec<TourStop>,
    /// Guide user ids.
    #[serde(default)]
    pub guides: Vec<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Create or partial-update payload for a tour.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourDraft {
    /// Display name.
    pub name: Option<String>,
    /// Length in days.
    pub duration: Option<u32>,
    /// Largest accepted group.
    pub max_group_size: Option<u32>,
    /// `easy`, `medium` or `difficult`.
    pub difficulty: Option<String>,
    /// Mean rating override.
    pub ratings_average: Option<f64>,
    /// Review count override.
    pub ratings_quantity: Option<u32>,
    /// Regular price.
    pub price: Option<f64>,
    /// Discounted price.
    pub price_discount: Option<f64>,
    /// One-line summary.
    pub summary: Option<String>,
    /// Long description.
    pub description: Option<String>,
    /// Cover image file name.
    pub image_cover: Option<String>,
    /// Gallery image file names.
    pub images: Option<Vec<String>>,
    /// Scheduled departures.
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    /// Hide from listings.
    pub secret_tour: Option<bool>,
    /// Meeting point.
    pub start_location: Option<GeoPoint>,
    /// Itinerary.
    pub locations: Option<Vec<TourStop>>,
    /// Guide user ids, as strings.
    pub guides: Option<Vec<String>>,
}

impl TourRecord {
    /// Build a tour from a draft, enforcing required fields and every rule.
    pub fn create(draft: TourDraft, now: DateTime<Utc>) -> Result<Self, StoreError> {
        let guides = match &draft.guides {
            Some(raw) => parse_ids("guides", raw)?,
            None => Vec::new(),
        };

        let mut errors = ValidationErrors::new();
        let name = required(&mut errors, "name", trimmed(draft.name), "A tour must have a name");
        let duration = required(&mut errors, "duration", draft.duration, "A tour must have a duration");
        let max_group_size = required(
            &mut errors,
            "maxGroupSize",
            draft.max_group_size,
            "A tour must have a group size",
        );
        let difficulty = match draft.difficulty.as_deref() {
            None => {
                errors.push("difficulty", "A tour must have a difficulty");
                None
            }
            Some(raw) => {
                let parsed = Difficulty::parse(raw);
                if parsed.is_none() {
                    errors.push("difficulty", DIFFICULTY_MESSAGE);
                }
                parsed
            }
        };
        let price = required(&mut errors, "price", draft.price, "A tour must have a price");
        let summary = required(
            &mut errors,
            "summary",
            trimmed(draft.summary),
            "A tour must have a summary",
        );
        let image_cover = required(
            &mut errors,
            "imageCover",
            trimmed(draft.image_cover),
            "A tour must have a cover image",
        );

        let (
            Some(name),
            Some(duration),
            Some(max_group_size),
            Some(difficulty),
            Some(price),
            Some(summary),
            Some(image_cover),
        ) = (name, duration, max_group_size, difficulty, price, summary, image_cover)
        else {
            return Err(errors.into());
        };

        let tour = Self {
            id: Uuid::new_v4(),
            slug: slugify(&name),
            name,
            duration,
            max_group_size,
            difficulty,
            ratings_average: round_rating(draft.ratings_average.unwrap_or(DEFAULT_RATING)),
            ratings_quantity: draft.ratings_quantity.unwrap_or(0),
            price,
            price_discount: draft.price_discount,
            summary,
            description: trimmed(draft.description),
            image_cover,
            images: draft.images.unwrap_or_default(),
            start_dates: draft.start_dates.unwrap_or_default(),
            secret_tour: draft.secret_tour.unwrap_or(false),
            start_location: draft.start_location,
            locations: draft.locations.unwrap_or_default(),
            guides,
            created_at: now,
        };
        tour.check()?;
        Ok(tour)
    }

    /// Merge the fields present in `patch` and re-validate. On failure the
    /// record is left untouched.
    pub fn apply(&mut self, patch: TourDraft) -> Result<(), StoreError> {
        let mut next = self.clone();
        let mut errors = ValidationErrors::new();

        if let Some(raw) = &patch.guides {
            next.guides = parse_ids("guides", raw)?;
        }
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
            next.slug = slugify(&next.name);
        }
        if let Some(duration) = patch.duration {
            next.duration = duration;
        }
        if let Some(size) = patch.max_group_size {
            next.max_group_size = size;
        }
        if let Some(raw) = patch.difficulty.as_deref() {
            match Difficulty::parse(raw) {
                Some(d) => next.difficulty = d,
                None => errors.push("difficulty", DIFFICULTY_MESSAGE),
            }
        }
        if let Some(avg) = patch.ratings_average {
            next.ratings_average = round_rating(avg);
        }
        if let Some(qty) = patch.ratings_quantity {
            next.ratings_quantity = qty;
        }
        if let Some(price) = patch.price {
            next.price = price;
        }
        if patch.price_discount.is_some() {
            next.price_discount = patch.price_discount;
        }
        if let Some(summary) = patch.summary {
            next.summary = summary.trim().to_string();
        }
        if patch.description.is_some() {
            next.description = trimmed(patch.description);
        }
        if let Some(cover) = patch.image_cover {
            next.image_cover = cover.trim().to_string();
        }
        if let Some(images) = patch.images {
            next.images = images;
        }
        if let Some(dates) = patch.start_dates {
            next.start_dates = dates;
        }
        if let Some(secret) = patch.secret_tour {
            next.secret_tour = secret;
        }
        if patch.start_location.is_some() {
            next.start_location = patch.start_location;
        }
        if let Some(locations) = patch.locations {
            next.locations = locations;
        }

        if let Err(rules) = next.check() {
            for err in rules.iter() {
                errors.push(err.field.clone(), err.message.clone());
            }
        }
        errors.into_result()?;
        *self = next;
        Ok(())
    }

    /// Check the field rules that hold for every stored tour.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name_len = self.name.chars().count();
        if self.name.is_empty() {
            errors.push("name", "A tour must have a name");
        } else if name_len < NAME_MIN_LEN {
            errors.push(
                "name",
                format!("A tour name must have more or equal than {NAME_MIN_LEN} characters"),
            );
        } else if name_len > NAME_MAX_LEN {
            errors.push(
                "name",
                format!("A tour name must have less or equal than {NAME_MAX_LEN} characters"),
            );
        }
        if self.ratings_average < 1.0 {
            errors.push("ratingsAverage", "Rating must be above 1.0");
        } else if self.ratings_average > 5.0 {
            errors.push("ratingsAverage", "Rating must be below 5.0");
        }
        if self.price < 0.0 {
            errors.push("price", "A tour price cannot be negative");
        }
        if let Some(discount) = self.price_discount {
            if discount >= self.price {
                errors.push(
                    "priceDiscount",
                    format!("Discount price ({discount}) should be below regular price"),
                );
            }
        }
        if self.summary.is_empty() {
            errors.push("summary", "A tour must have a summary");
        }
        if self.image_cover.is_empty() {
            errors.push("imageCover", "A tour must have a cover image");
        }
        errors.into_result()
    }

    /// Whether the tour may appear in listings and lookups.
    pub fn is_visible(&self) -> bool {
        !self.secret_tour
    }

    /// Duration expressed in weeks.
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }

    /// Overwrite the review aggregates.
    pub fn set_rating_stats(&mut self, quantity: u32, average: f64) {
        self.ratings_quantity = quantity;
        self.ratings_average = round_rating(average);
    }
}

/// Lower-case, hyphen-separated URL slug.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required<T>(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<T>,
    message: &str,
) -> Option<T> {
    if value.is_none() {
        errors.push(field, message);
    }
    value
}
