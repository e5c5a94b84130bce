//! # Tour Catalogue API
//!
//! Reads are public. Creating, editing and deleting tours is limited to
//! admins and lead guides. Secret tours never appear in any response.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use tourbook_core::{PublicUser, Role, TourDraft, TourRecord};

use super::{created, deleted, list, restricted, single, to_json};
use crate::error::AppError;
use crate::extractors::{extract_json, path_id};
use crate::state::AppState;

/// Build the tours router.
pub fn router(state: &AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/tours", get(list_tours))
        .route("/tours/:id", get(get_tour));

    let staff = Router::new()
        .route("/tours", post(create_tour))
        .route("/tours/:id", patch(update_tour).delete(delete_tour));

    public.merge(restricted(staff, state, [Role::Admin, Role::LeadGuide]))
}

/// A tour as clients see it: guides resolved to public user views and the
/// computed `durationWeeks`; reviews attached when requested.
pub(crate) fn tour_view(
    state: &AppState,
    tour: &TourRecord,
    with_reviews: bool,
) -> Result<Value, AppError> {
    let mut view = to_json(tour)?;
    let guides: Vec<PublicUser> = tour
        .guides
        .iter()
        .filter_map(|id| state.active_user(id))
        .map(|u| u.public())
        .collect();
    if let Some(obj) = view.as_object_mut() {
        obj.insert("guides".into(), to_json(&guides)?);
        obj.insert("durationWeeks".into(), Value::from(tour.duration_weeks()));
        if with_reviews {
            let mut reviews = state.reviews.filter(|r| r.tour == tour.id);
            reviews.sort_by_key(|r| r.created_at);
            obj.insert("reviews".into(), to_json(&reviews)?);
        }
    }
    Ok(view)
}

/// GET /tours — Every visible tour, oldest first.
async fn list_tours(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let tours = state
        .visible_tours()
        .iter()
        .map(|t| tour_view(&state, t, false))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(list(&tours))
}

/// GET /tours/:id — One tour with its reviews.
async fn get_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = path_id("id", &id)?;
    let tour = state.visible_tour(&id).ok_or_else(AppError::no_document)?;
    Ok(single(&tour_view(&state, &tour, true)?))
}

/// POST /tours
async fn create_tour(
    State(state): State<AppState>,
    body: Result<Json<TourDraft>, JsonRejection>,
) -> Result<Response, AppError> {
    let draft = extract_json(body)?;
    let tour = TourRecord::create(draft, Utc::now())?;
    let tour = state.insert_tour(tour)?;
    state.persist(&tour).await?;
    tracing::info!(tour_id = %tour.id, name = %tour.name, "tour created");
    Ok(created(&tour_view(&state, &tour, false)?))
}

/// PATCH /tours/:id
async fn update_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TourDraft>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_id("id", &id)?;
    let draft = extract_json(body)?;
    let tour = state
        .update_tour(&id, |t| Ok(t.apply(draft)?))?
        .ok_or_else(AppError::no_document)?;
    state.persist(&tour).await?;
    Ok(single(&tour_view(&state, &tour, false)?))
}

/// DELETE /tours/:id
async fn delete_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = path_id("id", &id)?;
    if state.visible_tour(&id).is_none() {
        return Err(AppError::no_document());
    }
    state.tours.remove(&id);
    state.forget::<TourRecord>(id).await?;
    tracing::info!(tour_id = %id, "tour deleted");
    Ok(deleted())
}
