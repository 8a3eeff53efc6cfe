//! Stripe webhook endpoint
//!
//! Takes the raw body so the signature is verified over exactly the bytes
//! Stripe sent. A signature failure is the only 400; processing errors
//! return 500 so Stripe retries the delivery.

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".to_string()))?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;
    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
