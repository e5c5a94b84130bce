//! # Booking API
//!
//! Any logged-in user can open a payment session for a tour. Booking
//! records themselves are managed by admins and lead guides; customers'
//! bookings are created when the payment processor redirects back to the
//! overview page (see `routes::views`).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tourbook_core::{BookingDraft, BookingRecord, Role};

use super::{created, deleted, list, origin, protected, restricted, single};
use crate::auth::CurrentUser;
use crate::checkout::CheckoutRequest;
use crate::error::AppError;
use crate::extractors::{extract_json, path_id};
use crate::state::AppState;
use crate::token::SecureTransport;

/// Build the bookings router.
pub fn router(state: &AppState) -> Router<AppState> {
    let customers =
        Router::new().route("/booking/checkout-session/:tourId", get(checkout_session));

    let staff = Router::new()
        .route("/booking", get(list_bookings).post(create_booking))
        .route(
            "/booking/:id",
            get(get_booking).patch(update_booking).delete(delete_booking),
        );

    protected(customers, state).merge(restricted(staff, state, [Role::Admin, Role::LeadGuide]))
}

/// GET /booking/checkout-session/:tourId — Open a hosted payment session.
///
/// The success URL carries tour, user and price back to `/`, where the
/// booking is recorded.
async fn checkout_session(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    secure: SecureTransport,
    headers: HeaderMap,
    Path(tour_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let tour_id = path_id("tourId", &tour_id)?;
    let tour = state.visible_tour(&tour_id).ok_or_else(AppError::no_document)?;
    let origin = origin(secure, &headers);

    let request = CheckoutRequest {
        tour_id: tour.id,
        name: format!("{} Tour", tour.name),
        description: tour.summary.clone(),
        image: format!("{origin}/img/tours/{}", tour.image_cover),
        amount: tour.price,
        customer_email: me.email.clone(),
        success_url: format!("{origin}/?tour={}&user={}&price={}", tour.id, me.id, tour.price),
        cancel_url: format!("{origin}/tour/{}", tour.slug),
    };
    let session = state
        .checkout
        .create_session(request)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({ "status": "success", "session": session })))
}

/// GET /booking — Newest first.
async fn list_bookings(State(state): State<AppState>) -> Json<Value> {
    let mut bookings = state.bookings.list();
    bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    list(&bookings)
}

/// POST /booking
async fn create_booking(
    State(state): State<AppState>,
    body: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<Response, AppError> {
    let draft = extract_json(body)?;
    let booking = BookingRecord::create(draft, Utc::now())?;
    state.bookings.insert(booking.id, booking.clone());
    state.persist(&booking).await?;
    Ok(created(&booking))
}

/// GET /booking/:id
async fn get_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let id = path_id("id", &id)?;
    let booking = state.bookings.get(&id).ok_or_else(AppError::no_document)?;
    Ok(single(&booking))
}

/// PATCH /booking/:id
async fn update_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let id = path_id("id", &id)?;
    let draft = extract_json(body)?;
    let booking = state
        .bookings
        .try_update(&id, |b| {
            b.apply(draft)?;
            Ok::<_, AppError>(b.clone())
        })
        .ok_or_else(AppError::no_document)??;
    state.persist(&booking).await?;
    Ok(single(&booking))
}

/// DELETE /booking/:id
async fn delete_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = path_id("id", &id)?;
    state.bookings.remove(&id).ok_or_else(AppError::no_document)?;
    state.forget::<BookingRecord>(id).await?;
    Ok(deleted())
}
