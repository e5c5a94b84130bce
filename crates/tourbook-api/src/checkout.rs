//! # Payment Checkout
//!
//! Payment sessions are created by an external processor behind the
//! [`CheckoutGateway`] trait. The processor redirects the customer to the
//! session's success URL once the charge settles; the overview page turns
//! that redirect into a booking.
//!
//! [`LocalCheckoutGateway`] issues session ids without charging anyone and
//! is what the service runs with when no processor is configured.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// What the customer is buying.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    /// Tour being booked; echoed back as the client reference.
    pub tour_id: Uuid,
    /// Line item name.
    pub name: String,
    /// Line item description.
    pub description: String,
    /// Absolute URL of the line item image.
    pub image: String,
    /// Price per person.
    pub amount: f64,
    /// Customer email, pre-filled on the payment form.
    pub customer_email: String,
    /// Where the processor sends the customer after payment.
    pub success_url: String,
    /// Where the processor sends the customer on cancel.
    pub cancel_url: String,
}

/// A created payment session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// Processor session id.
    pub id: String,
    /// Hosted payment page.
    pub url: String,
    /// Tour id the session was created for.
    pub client_reference_id: Uuid,
    /// Customer email.
    pub customer_email: String,
    /// Amount charged, in minor units.
    pub amount_total: i64,
    /// Post-payment redirect.
    pub success_url: String,
    /// Cancel redirect.
    pub cancel_url: String,
}

/// Session creation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    /// The processor rejected the request.
    #[error("checkout session rejected: {0}")]
    Rejected(String),
}

/// Creates payment sessions.
#[async_trait::async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Create a hosted payment session for one booking.
    async fn create_session(&self, request: CheckoutRequest)
        -> Result<CheckoutSession, CheckoutError>;
}

/// Issues local session ids; no money moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCheckoutGateway;

#[async_trait::async_trait]
impl CheckoutGateway for LocalCheckoutGateway {
    async fn create_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, CheckoutError> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(CheckoutError::Rejected(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        let id = format!("cs_local_{}", Uuid::new_v4().simple());
        tracing::info!(session = %id, tour = %request.tour_id, "checkout session created");
        Ok(CheckoutSession {
            url: request.success_url.clone(),
            id,
            client_reference_id: request.tour_id,
            customer_email: request.customer_email,
            amount_total: (request.amount * 100.0).round() as i64,
            success_url: request.success_url,
            cancel_url: request.cancel_url,
        })
    }
}
