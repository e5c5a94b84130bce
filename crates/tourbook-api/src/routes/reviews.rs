//! # Review API
//!
//! Every route requires a session. Only `user`-role accounts write reviews;
//! `user` and `admin` accounts edit and delete them. Reviews can also be reached
//! through their tour at `/tours/:id/reviews`, where the tour id fills in
//! for a missing `tour` field.
//!
//! A tour's `ratingsQuantity` / `ratingsAverage` are recomputed after every
//! create, update and delete.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use tourbook_core::{ReviewDraft, ReviewRecord, Role, UserRecord};
use uuid::Uuid;

use super::{created, deleted, list, protected, restricted, single};
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::extractors::{extract_json, path_id};
use crate::state::AppState;

/// Build the reviews router.
pub fn router(state: &AppState) -> Router<AppState> {
    let readers = Router::new()
        .route("/reviews", get(list_reviews))
        .route("/reviews/:id", get(get_review))
        .route("/tours/:id/reviews", get(list_tour_reviews));

    let authors = Router::new()
        .route("/reviews", post(create_review))
        .route("/tours/:id/reviews", post(create_tour_review));

    let editors = Router::new().route("/reviews/:id", patch(update_review).delete(delete_review));

    protected(readers, state)
        .merge(restricted(authors, state, [Role::User]))
        .merge(restricted(editors, state, [Role::User, Role::Admin]))
}

fn sorted(mut reviews: Vec<ReviewRecord>) -> Vec<ReviewRecord> {
    reviews.sort_by_key(|r| r.created_at);
    reviews
}

/// GET /reviews
async fn list_reviews(State(state): State<AppState>) -> Json<Value> {
    list(&sorted(state.reviews.list()))
}

/// GET /tours/:id/reviews
async fn list_tour_reviews(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let tour_id = path_id("tourId", &tour_id)?;
    Ok(list(&sorted(state.reviews.filter(|r| r.tour == tour_id))))
}

/// GET /reviews/:id
async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = path_id("id", &id)?;
    let review = state.reviews.get(&id).ok_or_else(AppError::no_document)?;
    Ok(single(&review))
}

/// POST /reviews
async fn create_review(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    body: Result<Json<ReviewDraft>, JsonRejection>,
) -> Result<Response, AppError> {
    let draft = extract_json(body)?;
    insert_review(&state, &me, draft).await
}

/// POST /tours/:id/reviews
async fn create_tour_review(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(tour_id): Path<String>,
    body: Result<Json<ReviewDraft>, JsonRejection>,
) -> Result<Response, AppError> {
    let tour_id = path_id("tourId", &tour_id)?;
    let mut draft = extract_json(body)?;
    if draft.tour.is_none() {
        draft.tour = Some(tour_id.to_string());
    }
    insert_review(&state, &me, draft).await
}

async fn insert_review(
    state: &AppState,
    me: &UserRecord,
    mut draft: ReviewDraft,
) -> Result<Response, AppError> {
    if draft.user.is_none() {
        draft.user = Some(me.id.to_string());
    }
    let review = ReviewRecord::create(draft, Utc::now())?;
    let review = state.insert_review(review)?;
    state.persist(&review).await?;
    sync_ratings(state, review.tour).await?;
    Ok(created(&review))
}

/// PATCH /reviews/:id — Text and rating only.
async fn update_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ReviewDraft>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_id("id", &id)?;
    let draft = extract_json(body)?;
    let review = state
        .reviews
        .try_update(&id, |r| {
            r.apply(draft)?;
            Ok::<_, AppError>(r.clone())
        })
        .ok_or_else(AppError::no_document)??;
    state.persist(&review).await?;
    sync_ratings(&state, review.tour).await?;
    Ok(single(&review))
}

/// DELETE /reviews/:id
async fn delete_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = path_id("id", &id)?;
    let review = state.reviews.remove(&id).ok_or_else(AppError::no_document)?;
    state.forget::<ReviewRecord>(id).await?;
    sync_ratings(&state, review.tour).await?;
    Ok(deleted())
}

/// Recompute and persist the rating aggregates of `tour_id`.
async fn sync_ratings(state: &AppState, tour_id: Uuid) -> Result<(), AppError> {
    if let Some(tour) = state.refresh_tour_ratings(&tour_id) {
        state.persist(&tour).await?;
    }
    Ok(())
}
