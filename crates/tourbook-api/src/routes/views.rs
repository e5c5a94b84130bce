//! # Rendered Site
//!
//! Browsing pages run behind `is_logged_in`, so the header can greet a
//! logged-in visitor without ever turning an anonymous one away. Account
//! pages run behind `protect`; failures there are rendered as error pages
//! by the normalization layer.

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tourbook_core::{BookingDraft, BookingRecord, PublicUser, StoreError, UserPatch, ValidationErrors};

use super::tours::tour_view;
use super::users::update_profile;
use super::{protected, to_json};
use crate::auth::{is_logged_in, CurrentUser};
use crate::error::AppError;
use crate::extractors::extract_form;
use crate::state::AppState;

const NO_SUCH_TOUR: &str = "There is no tour with that name.";

/// Query string the payment processor redirects to after a charge.
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutReturn {
    pub tour: Option<String>,
    pub user: Option<String>,
    pub price: Option<String>,
}

impl CheckoutReturn {
    fn is_empty(&self) -> bool {
        self.tour.is_none() && self.user.is_none() && self.price.is_none()
    }
}

/// Account settings form.
#[derive(Debug, Default, Deserialize)]
pub struct UserDataForm {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Build the pages router.
pub fn router(state: &AppState) -> Router<AppState> {
    let browsing = Router::new()
        .route("/", get(overview))
        .route("/tour/:slug", get(tour_page))
        .route("/login", get(login_page))
        .route_layer(from_fn_with_state(state.clone(), is_logged_in));

    let account = Router::new()
        .route("/me", get(account_page))
        .route("/my-tours", get(my_tours))
        .route("/submit-user-data", post(submit_user_data));

    browsing.merge(protected(account, state))
}

fn render(
    state: &AppState,
    template: &str,
    title: &str,
    user: Option<PublicUser>,
    mut context: Value,
) -> Result<Html<String>, AppError> {
    if let Some(obj) = context.as_object_mut() {
        obj.insert("title".into(), Value::from(title));
        obj.insert("user".into(), to_json(&user)?);
    }
    state
        .renderer
        .render(template, &context)
        .map(Html)
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn visitor(user: Option<CurrentUser>) -> Option<PublicUser> {
    user.map(|CurrentUser(u)| u.public())
}

/// GET / — Tour overview; also records a booking when the payment
/// processor redirects back here with `tour`, `user` and `price`.
async fn overview(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Query(paid): Query<CheckoutReturn>,
) -> Result<Response, AppError> {
    if !paid.is_empty() {
        record_checkout(&state, paid).await?;
        return Ok(Redirect::to("/").into_response());
    }

    let tours = state
        .visible_tours()
        .iter()
        .map(|t| tour_view(&state, t, false))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(render(&state, "overview", "All Tours", visitor(user), json!({ "tours": tours }))?.into_response())
}

async fn record_checkout(state: &AppState, paid: CheckoutReturn) -> Result<(), AppError> {
    let price = match paid.price.as_deref() {
        None => None,
        Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
            let mut errors = ValidationErrors::new();
            errors.push(
                "price",
                format!("Cast to Number failed for value \"{raw}\" at path \"price\""),
            );
            StoreError::from(errors)
        })?),
    };
    let booking = BookingRecord::create(
        BookingDraft {
            tour: paid.tour,
            user: paid.user,
            price,
            paid: None,
        },
        Utc::now(),
    )?;
    state.bookings.insert(booking.id, booking.clone());
    state.persist(&booking).await?;
    tracing::info!(booking_id = %booking.id, tour_id = %booking.tour, user_id = %booking.user, "booking recorded from checkout");
    Ok(())
}

/// GET /tour/:slug
async fn tour_page(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    Path(slug): Path<String>,
) -> Result<Html<String>, AppError> {
    let tour = state
        .tour_by_slug(&slug)
        .ok_or_else(|| AppError::NotFound(NO_SUCH_TOUR.into()))?;
    let mut view = tour_view(&state, &tour, true)?;
    let reviews = view
        .as_object_mut()
        .and_then(|obj| obj.remove("reviews"))
        .unwrap_or_else(|| json!([]));
    render(
        &state,
        "tour",
        &format!("{} Tour", tour.name),
        visitor(user),
        json!({ "tour": view, "reviews": reviews }),
    )
}

/// GET /login
async fn login_page(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
) -> Result<Html<String>, AppError> {
    render(&state, "login", "Log into your account", visitor(user), json!({}))
}

/// GET /me
async fn account_page(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Result<Html<String>, AppError> {
    render(&state, "account", "Your account", Some(me.public()), json!({}))
}

/// GET /my-tours — Tours the caller has booked.
async fn my_tours(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Result<Html<String>, AppError> {
    let mut bookings = state.bookings.filter(|b| b.user == me.id);
    bookings.sort_by_key(|b| b.created_at);
    let tours = bookings
        .iter()
        .filter_map(|b| state.visible_tour(&b.tour))
        .map(|t| tour_view(&state, &t, false))
        .collect::<Result<Vec<_>, _>>()?;
    render(&state, "overview", "My Tours", Some(me.public()), json!({ "tours": tours }))
}

/// POST /submit-user-data — Account form submission without JavaScript.
async fn submit_user_data(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    form: Result<Form<UserDataForm>, FormRejection>,
) -> Result<Html<String>, AppError> {
    let form = extract_form(form)?;
    let patch = UserPatch {
        name: form.name,
        email: form.email,
        ..UserPatch::default()
    };
    let user = update_profile(&state, &me, patch).await?;
    render(&state, "account", "Your account", Some(user), json!({}))
}
