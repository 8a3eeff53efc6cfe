//! HTTP route definitions

pub mod functions;
pub mod invoices;
pub mod portal;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{auth, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/invoices", post(invoices::create).get(invoices::list))
        .route("/invoices/{id}", get(invoices::get_one).patch(invoices::update))
        .route("/invoices/{id}/send", post(invoices::send))
        .route("/invoices/{id}/cancel", post(invoices::cancel))
        .route("/functions/invite-user", post(functions::invite_user))
        .route("/functions/delete-user", post(functions::delete_user))
        .layer(middleware::from_fn(auth::require_admin))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let authed = Router::new()
        .route(
            "/functions/checkout-session",
            post(functions::checkout_session),
        )
        .route(
            "/functions/create-subscription",
            post(functions::create_subscription),
        )
        .route("/functions/invoice-pdf/{id}", get(functions::invoice_pdf))
        .route("/functions/receipt/{payment_id}", get(functions::receipt))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    // Webhooks and the tracking portal authenticate by signature / capability
    // code, not by session.
    let public = Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/portal/track/{code}", get(portal::track))
        .route("/portal/track/{code}/checkout", post(portal::checkout));

    Router::new()
        .merge(public)
        .merge(authed)
        .nest("/admin", admin)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
