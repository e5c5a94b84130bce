//! # Application State
//!
//! Everything a handler can reach through `State<AppState>`: record
//! stores, collaborators, the optional pool and configuration.
//!
//! ## Architecture
//!
//! - **Stores**: users, tours, reviews, bookings. In-memory maps are the
//!   source of truth while the process runs.
//! - **Collaborators**: token service, mailer, checkout gateway, page
//!   renderer. Each sits behind a trait object so tests and deployments can
//!   swap implementations.
//! - **Persistence**: an optional Postgres pool. When present, every
//!   mutation is written through with [`AppState::persist`] and the stores
//!   are hydrated at startup.
//!
//! Unique fields (user email, tour name, one review per tour and user) are
//! checked under the same write lock as the insert or update, so two
//! concurrent requests cannot both claim a value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;
use tourbook_core::{BookingRecord, ReviewRecord, StoreError, TourRecord, UserRecord};
use uuid::Uuid;

use crate::checkout::{CheckoutGateway, LocalCheckoutGateway};
use crate::config::AppConfig;
use crate::db::documents::{self, Document};
use crate::error::AppError;
use crate::mail::{Mailer, OutboxMailer};
use crate::middleware::rate_limit::RateLimiter;
use crate::token::{JwtTokenService, TokenService};
use crate::views::{HtmlRenderer, PageRenderer};

// -- Generic In-Memory Store --------------------------------------------------

/// Records keyed by id behind a shared lock. Clones share the map.
///
/// Every operation is synchronous and never holds the `parking_lot` lock
/// across an `.await`. The lock does not poison.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// First record matching `pred`.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| pred(v)).cloned()
    }

    /// Every record matching `pred`.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data
            .read()
            .values()
            .filter(|v| pred(v))
            .cloned()
            .collect()
    }

    /// Insert `value` unless `conflict` reports a clash with an existing
    /// record. Check and insert happen under one write lock.
    pub fn insert_unique<E>(
        &self,
        id: Uuid,
        value: T,
        conflict: impl Fn(&T, &T) -> Option<E>,
    ) -> Result<T, E> {
        let mut guard = self.data.write();
        if let Some(err) = guard
            .iter()
            .filter(|(k, _)| **k != id)
            .find_map(|(_, existing)| conflict(existing, &value))
        {
            return Err(err);
        }
        guard.insert(id, value.clone());
        Ok(value)
    }

    /// Atomically read-validate-update a record.
    ///
    /// `f` edits a copy; the copy is checked against every other record
    /// with `conflict` and only then committed. Returns `None` if the
    /// record doesn't exist.
    pub fn update_unique<E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<(), E>,
        conflict: impl Fn(&T, &T) -> Option<E>,
    ) -> Option<Result<T, E>> {
        let mut guard = self.data.write();
        let mut next = guard.get(id)?.clone();
        if let Err(err) = f(&mut next) {
            return Some(Err(err));
        }
        if let Some(err) = guard
            .iter()
            .filter(|(k, _)| *k != id)
            .find_map(|(_, existing)| conflict(existing, &next))
        {
            return Some(Err(err));
        }
        guard.insert(*id, next.clone());
        Some(Ok(next))
    }

    /// Edit a record in place and return the result; `None` for an unknown id.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        let entry = guard.get_mut(id)?;
        f(entry);
        Some(entry.clone())
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure may inspect the current state, mutate the record, and
    /// return `Ok(R)` or `Err(E)`. Returns `None` if the record doesn't
    /// exist.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// Apply `f` to every record; returns copies of those it reports as
    /// changed.
    pub fn update_where(&self, mut f: impl FnMut(&mut T) -> bool) -> Vec<T> {
        self.data
            .write()
            .values_mut()
            .filter_map(|v| if f(v) { Some(v.clone()) } else { None })
            .collect()
    }

    /// Remove a record by ID.
    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    /// Record count.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Uniqueness rules ---------------------------------------------------------

fn email_conflict(existing: &UserRecord, candidate: &UserRecord) -> Option<AppError> {
    (existing.email == candidate.email).then(|| {
        StoreError::Duplicate {
            field: "email".to_string(),
            value: candidate.email.clone(),
        }
        .into()
    })
}

fn tour_name_conflict(existing: &TourRecord, candidate: &TourRecord) -> Option<AppError> {
    (existing.name == candidate.name).then(|| {
        StoreError::Duplicate {
            field: "name".to_string(),
            value: candidate.name.clone(),
        }
        .into()
    })
}

fn review_conflict(existing: &ReviewRecord, candidate: &ReviewRecord) -> Option<AppError> {
    (existing.tour == candidate.tour && existing.user == candidate.user).then(|| {
        StoreError::Duplicate {
            field: "tour, user".to_string(),
            value: format!("{}/{}", candidate.tour, candidate.user),
        }
        .into()
    })
}

// -- Application State --------------------------------------------------------

/// Handler state. Cheap to clone: every field is shared.
///
/// Clone-friendly via `Arc` internals in each `Store` and collaborator.
#[derive(Clone)]
pub struct AppState {
    /// User accounts.
    pub users: Store<UserRecord>,
    /// Tour catalogue.
    pub tours: Store<TourRecord>,
    /// Tour reviews.
    pub reviews: Store<ReviewRecord>,
    /// Paid bookings.
    pub bookings: Store<BookingRecord>,

    /// Session token signer/verifier.
    pub tokens: Arc<dyn TokenService>,
    /// Account email transport.
    pub mailer: Arc<dyn Mailer>,
    /// Payment session creation.
    pub checkout: Arc<dyn CheckoutGateway>,
    /// HTML page rendering.
    pub renderer: Arc<dyn PageRenderer>,
    /// `/api` request counter.
    pub limiter: RateLimiter,

    /// PostgreSQL pool for write-through persistence. `None` runs
    /// in-memory only.
    pub db_pool: Option<PgPool>,

    /// Immutable configuration.
    pub config: AppConfig,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("users", &self.users.len())
            .field("tours", &self.tours.len())
            .field("reviews", &self.reviews.len())
            .field("bookings", &self.bookings.len())
            .field("persistent", &self.db_pool.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl AppState {
    /// State with empty stores and the built-in collaborators.
    pub fn new(config: AppConfig) -> Self {
        let tokens = JwtTokenService::new(config.jwt_secret.as_bytes(), config.jwt_expires_in);
        Self {
            users: Store::new(),
            tours: Store::new(),
            reviews: Store::new(),
            bookings: Store::new(),
            tokens: Arc::new(tokens),
            mailer: Arc::new(OutboxMailer::new()),
            checkout: Arc::new(LocalCheckoutGateway),
            renderer: Arc::new(HtmlRenderer),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            db_pool: None,
            config,
        }
    }

    /// Replace the mail transport.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Replace the payment gateway.
    pub fn with_checkout(mut self, checkout: Arc<dyn CheckoutGateway>) -> Self {
        self.checkout = checkout;
        self
    }

    /// Replace the page renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Attach a database pool for write-through persistence.
    pub fn with_db_pool(mut self, pool: Option<PgPool>) -> Self {
        self.db_pool = pool;
        self
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a database pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };

        let users = documents::load_all::<UserRecord>(pool).await?;
        let tours = documents::load_all::<TourRecord>(pool).await?;
        let reviews = documents::load_all::<ReviewRecord>(pool).await?;
        let bookings = documents::load_all::<BookingRecord>(pool).await?;
        tracing::info!(
            users = users.len(),
            tours = tours.len(),
            reviews = reviews.len(),
            bookings = bookings.len(),
            "hydrated stores from database"
        );

        for user in users {
            self.users.insert(user.id, user);
        }
        for tour in tours {
            self.tours.insert(tour.id, tour);
        }
        for review in reviews {
            self.reviews.insert(review.id, review);
        }
        for booking in bookings {
            self.bookings.insert(booking.id, booking);
        }
        Ok(())
    }

    /// Write a record through to the database, if one is attached.
    ///
    /// Failure is surfaced to the caller because the in-memory record would
    /// be lost on restart.
    pub async fn persist<D: Document>(&self, doc: &D) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            if let Err(e) = documents::upsert(pool, doc).await {
                tracing::error!(collection = D::COLLECTION, id = %doc.id(), error = %e, "failed to persist document");
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Delete a record from the database, if one is attached.
    pub async fn forget<D: Document>(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            if let Err(e) = documents::delete::<D>(pool, id).await {
                tracing::error!(collection = D::COLLECTION, %id, error = %e, "failed to delete document");
                return Err(e.into());
            }
        }
        Ok(())
    }

    // -- Users ----------------------------------------------------------------

    /// An active user by id. Deactivated accounts are invisible.
    pub fn active_user(&self, id: &Uuid) -> Option<UserRecord> {
        self.users.get(id).filter(|u| u.active)
    }

    /// An active user by email (case-insensitive).
    pub fn user_by_email(&self, email: &str) -> Option<UserRecord> {
        let email = email.trim().to_lowercase();
        self.users.find(|u| u.active && u.email == email)
    }

    /// The active user holding an unexpired reset token with this digest.
    pub fn user_by_reset_digest(&self, digest: &str, now: DateTime<Utc>) -> Option<UserRecord> {
        self.users
            .find(|u| u.active && u.reset_token_matches(digest, now))
    }

    /// Store a new user; the email must be unused.
    pub fn insert_user(&self, user: UserRecord) -> Result<UserRecord, AppError> {
        self.users.insert_unique(user.id, user, email_conflict)
    }

    /// Edit an active user; the email must stay unique. `Ok(None)` when no
    /// such user exists.
    pub fn update_user(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut UserRecord) -> Result<(), AppError>,
    ) -> Result<Option<UserRecord>, AppError> {
        if self.active_user(id).is_none() {
            return Ok(None);
        }
        self.users.update_unique(id, f, email_conflict).transpose()
    }

    /// Clear reset tokens that expired before `now`; returns the users
    /// that changed.
    pub fn clear_expired_resets(&self, now: DateTime<Utc>) -> Vec<UserRecord> {
        self.users.update_where(|user| match user.password_reset_expires_at {
            Some(expires) if expires <= now => {
                user.clear_password_reset();
                true
            }
            _ => false,
        })
    }

    // -- Tours ----------------------------------------------------------------

    /// A non-secret tour by id.
    pub fn visible_tour(&self, id: &Uuid) -> Option<TourRecord> {
        self.tours.get(id).filter(TourRecord::is_visible)
    }

    /// A non-secret tour by slug.
    pub fn tour_by_slug(&self, slug: &str) -> Option<TourRecord> {
        self.tours.find(|t| t.is_visible() && t.slug == slug)
    }

    /// Every non-secret tour, oldest first.
    pub fn visible_tours(&self) -> Vec<TourRecord> {
        let mut tours = self.tours.filter(TourRecord::is_visible);
        tours.sort_by_key(|t| t.created_at);
        tours
    }

    /// Store a new tour; the name must be unused.
    pub fn insert_tour(&self, tour: TourRecord) -> Result<TourRecord, AppError> {
        self.tours.insert_unique(tour.id, tour, tour_name_conflict)
    }

    /// Edit a tour; the name must stay unique.
    pub fn update_tour(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut TourRecord) -> Result<(), AppError>,
    ) -> Result<Option<TourRecord>, AppError> {
        if self.visible_tour(id).is_none() {
            return Ok(None);
        }
        self.tours.update_unique(id, f, tour_name_conflict).transpose()
    }

    // -- Reviews --------------------------------------------------------------

    /// Store a new review; one per tour and user.
    pub fn insert_review(&self, review: ReviewRecord) -> Result<ReviewRecord, AppError> {
        self.reviews.insert_unique(review.id, review, review_conflict)
    }

    /// Recompute a tour's rating aggregates from its reviews. Returns the
    /// updated tour, or `None` if it no longer exists.
    pub fn refresh_tour_ratings(&self, tour_id: &Uuid) -> Option<TourRecord> {
        let reviews = self.reviews.filter(|r| r.tour == *tour_id);
        let (quantity, average) = tourbook_core::rating_stats(&reviews);
        self.tours.update(tour_id, |tour| tour.set_rating_stats(quantity, average))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use chrono::Duration;
    use tourbook_core::{ReviewDraft, TourDraft};

    const SECRET: &str = "state-tests-secret-with-at-least-32-bytes";

    fn state() -> AppState {
        AppState::new(AppConfig::new(Environment::Development, SECRET))
    }

    fn user(email: &str) -> UserRecord {
        UserRecord::new("Test User", email, None, "pass1234").unwrap()
    }

    fn tour(name: &str) -> TourRecord {
        TourRecord::create(
            TourDraft {
                name: Some(name.into()),
                duration: Some(5),
                max_group_size: Some(10),
                difficulty: Some("easy".into()),
                price: Some(100.0),
                summary: Some("summary".into()),
                image_cover: Some("cover.jpg".into()),
                ..TourDraft::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn review(tour: Uuid, user: Uuid, rating: f64) -> ReviewRecord {
        ReviewRecord::create(
            ReviewDraft {
                review: Some("Great".into()),
                rating: Some(rating),
                tour: Some(tour.to_string()),
                user: Some(user.to_string()),
            },
            Utc::now(),
        )
        .unwrap()
    }

    // -- Store tests ----------------------------------------------------------

    #[test]
    fn store_insert_and_get() {
        let store = Store::new();
        let id = Uuid::new_v4();
        assert!(store.insert(id, 1).is_none());
        assert_eq!(store.get(&id), Some(1));
        assert_eq!(store.insert(id, 2), Some(1));
    }

    #[test]
    fn store_find_and_filter() {
        let store = Store::new();
        for n in 0..5 {
            store.insert(Uuid::new_v4(), n);
        }
        assert_eq!(store.find(|n| *n == 3), Some(3));
        assert_eq!(store.filter(|n| n % 2 == 0).len(), 3);
    }

    #[test]
    fn store_insert_unique_rejects_conflict() {
        let store = Store::new();
        store
            .insert_unique(Uuid::new_v4(), 7, |a: &i32, b: &i32| (a == b).then_some("dup"))
            .unwrap();
        let err = store
            .insert_unique(Uuid::new_v4(), 7, |a: &i32, b: &i32| (a == b).then_some("dup"))
            .unwrap_err();
        assert_eq!(err, "dup");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_update_unique_ignores_self_and_rolls_back() {
        let store = Store::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.insert(a, 1);
        store.insert(b, 2);
        let same = |x: &i32, y: &i32| (x == y).then_some("dup");

        // Re-saving the same value does not clash with itself.
        assert_eq!(store.update_unique(&a, |_| Ok(()), same), Some(Ok(1)));
        // Taking another record's value is rejected and nothing changes.
        assert_eq!(
            store.update_unique(&a, |v| { *v = 2; Ok(()) }, same),
            Some(Err("dup"))
        );
        assert_eq!(store.get(&a), Some(1));
        assert!(store.update_unique(&Uuid::new_v4(), |_| Ok(()), same).is_none());
    }

    #[test]
    fn store_update_where_reports_changes() {
        let store = Store::new();
        store.insert(Uuid::new_v4(), 1);
        store.insert(Uuid::new_v4(), 10);
        let changed = store.update_where(|v| {
            if *v > 5 {
                *v = 0;
                true
            } else {
                false
            }
        });
        assert_eq!(changed, vec![0]);
        assert!(store.find(|v| *v == 10).is_none());
    }

    #[test]
    fn store_remove() {
        let store = Store::new();
        let id = Uuid::new_v4();
        store.insert(id, "x");
        assert_eq!(store.get(&id), Some("x"));
        assert_eq!(store.remove(&id), Some("x"));
        assert!(store.is_empty());
    }

    #[test]
    fn store_clone_shares_underlying_data() {
        let store = Store::new();
        let clone = store.clone();
        clone.insert(Uuid::new_v4(), 1);
        assert_eq!(store.len(), 1);
    }

    // -- AppState tests -------------------------------------------------------

    #[test]
    fn duplicate_email_is_rejected_case_insensitively() {
        let state = state();
        state.insert_user(user("ana@example.com")).unwrap();
        let err = state.insert_user(user("ANA@example.com")).unwrap_err();
        assert!(matches!(
            err,
            AppError::Store(StoreError::Duplicate { ref field, .. }) if field == "email"
        ));
    }

    #[test]
    fn deactivated_users_are_invisible() {
        let state = state();
        let u = state.insert_user(user("ana@example.com")).unwrap();
        state.users.update(&u.id, |u| u.active = false);
        assert!(state.active_user(&u.id).is_none());
        assert!(state.user_by_email("ana@example.com").is_none());
        assert!(state.update_user(&u.id, |_| Ok(())).unwrap().is_none());
    }

    #[test]
    fn update_user_enforces_unique_email() {
        let state = state();
        state.insert_user(user("ana@example.com")).unwrap();
        let bob = state.insert_user(user("bob@example.com")).unwrap();
        let err = state
            .update_user(&bob.id, |u| {
                u.email = "ana@example.com".into();
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateField");
        assert_eq!(state.active_user(&bob.id).unwrap().email, "bob@example.com");
    }

    #[test]
    fn reset_digest_lookup_and_sweep() {
        let state = state();
        let mut u = user("ana@example.com");
        let now = Utc::now();
        let token = u.create_password_reset_token(now);
        state.insert_user(u.clone()).unwrap();
        let digest = tourbook_core::reset_token_digest(&token);

        assert!(state.user_by_reset_digest(&digest, now).is_some());
        assert!(state.clear_expired_resets(now).is_empty());

        let later = now + Duration::minutes(11);
        assert!(state.user_by_reset_digest(&digest, later).is_none());
        let cleared = state.clear_expired_resets(later);
        assert_eq!(cleared.len(), 1);
        assert!(cleared[0].password_reset_digest.is_none());
    }

    #[test]
    fn secret_tours_are_hidden() {
        let state = state();
        let mut t = tour("The Secret Valley Tour");
        t.secret_tour = true;
        let t = state.insert_tour(t).unwrap();
        assert!(state.visible_tour(&t.id).is_none());
        assert!(state.tour_by_slug(&t.slug).is_none());
        assert!(state.visible_tours().is_empty());
    }

    #[test]
    fn duplicate_tour_name_is_rejected() {
        let state = state();
        state.insert_tour(tour("The Forest Hiker")).unwrap();
        assert!(state.insert_tour(tour("The Forest Hiker")).is_err());
    }

    #[test]
    fn one_review_per_tour_and_user() {
        let state = state();
        let t = state.insert_tour(tour("The Forest Hiker")).unwrap();
        let u = Uuid::new_v4();
        state.insert_review(review(t.id, u, 4.0)).unwrap();
        assert!(state.insert_review(review(t.id, u, 5.0)).is_err());
        assert!(state.insert_review(review(t.id, Uuid::new_v4(), 5.0)).is_ok());
    }

    #[test]
    fn ratings_refresh_from_reviews() {
        let state = state();
        let t = state.insert_tour(tour("The Forest Hiker")).unwrap();
        state.insert_review(review(t.id, Uuid::new_v4(), 4.0)).unwrap();
        let r = state.insert_review(review(t.id, Uuid::new_v4(), 5.0)).unwrap();

        let refreshed = state.refresh_tour_ratings(&t.id).unwrap();
        assert_eq!(refreshed.ratings_quantity, 2);
        assert_eq!(refreshed.ratings_average, 4.5);

        state.reviews.remove(&r.id);
        let refreshed = state.refresh_tour_ratings(&t.id).unwrap();
        assert_eq!(refreshed.ratings_quantity, 1);
        assert_eq!(refreshed.ratings_average, 4.0);
    }

    #[tokio::test]
    async fn persistence_is_a_no_op_without_pool() {
        let state = state();
        let u = user("ana@example.com");
        state.persist(&u).await.unwrap();
        state.forget::<UserRecord>(u.id).await.unwrap();
        state.hydrate_from_db().await.unwrap();
    }
}
