//! Billing function endpoints
//!
//! Checkout session and subscription creation, user invitations, and
//! document rendering. These mirror what the dashboard calls one-shot
//! "functions" rather than resource CRUD.

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use billtrack_billing::{
    render_invoice, render_receipt, CheckoutResponse, RecurringInterval, RenderedDocument,
    SubscriptionCreated,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Response envelope for one-shot function endpoints.
#[derive(Debug, Serialize)]
pub struct FunctionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionRequest {
    pub invoice_id: Uuid,
    /// None pays the full remaining balance
    pub amount_cents: Option<i64>,
    pub success_url: String,
    pub cancel_url: String,
}

pub async fn checkout_session(
    State(state): State<AppState>,
    Json(req): Json<CheckoutSessionRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let response = state
        .billing
        .checkout
        .create_session(
            req.invoice_id,
            req.amount_cents,
            &req.success_url,
            &req.cancel_url,
        )
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub invoice_id: Uuid,
    pub interval: RecurringInterval,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<SubscriptionCreated>> {
    let created = state
        .billing
        .subscriptions
        .create_from_invoice(req.invoice_id, req.interval)
        .await?;
    Ok(Json(created))
}

#[derive(Debug, Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub name: String,
    /// "admin" or "member"
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "member".to_string()
}

pub async fn invite_user(
    State(state): State<AppState>,
    Extension(inviter): Extension<AuthUser>,
    Json(req): Json<InviteUserRequest>,
) -> ApiResult<Json<FunctionOutcome>> {
    if !matches!(req.role.as_str(), "admin" | "member") {
        return Err(ApiError::BadRequest(format!("unknown role: {}", req.role)));
    }
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("invalid email address".to_string()));
    }

    let created: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, name, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(req.name.trim())
    .bind(&req.role)
    .fetch_optional(&state.pool)
    .await?;

    let Some((user_id,)) = created else {
        return Err(ApiError::BadRequest(
            "a user with this email already exists".to_string(),
        ));
    };

    // The user row is authoritative; the invitation email is best-effort.
    let accept_url = format!("{}/accept-invite?email={}", state.config.app_url, email);
    if let Err(e) = state
        .billing
        .email
        .send_user_invitation(&email, &inviter.email, &accept_url)
        .await
    {
        tracing::error!(user_id = %user_id, error = %e, "Failed to send invitation email");
    }

    tracing::info!(user_id = %user_id, invited_by = %inviter.user_id, "User invited");
    Ok(Json(FunctionOutcome::ok(format!("Invitation sent to {email}"))))
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub user_id: Uuid,
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
    Json(req): Json<DeleteUserRequest>,
) -> ApiResult<Json<FunctionOutcome>> {
    if req.user_id == caller.user_id {
        return Err(ApiError::BadRequest(
            "you cannot delete your own account".to_string(),
        ));
    }

    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(req.user_id)
        .execute(&state.pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound(req.user_id.to_string()));
    }

    tracing::info!(user_id = %req.user_id, deleted_by = %caller.user_id, "User deleted");
    Ok(Json(FunctionOutcome::ok("User deleted")))
}

#[derive(Debug, FromRow)]
struct ClientNameRow {
    name: String,
}

async fn client_name(state: &AppState, client_id: Uuid) -> ApiResult<String> {
    let row: Option<ClientNameRow> =
        sqlx::query_as("SELECT name FROM clients WHERE id = $1")
            .bind(client_id)
            .fetch_optional(&state.pool)
            .await?;
    Ok(row.map(|r| r.name).unwrap_or_else(|| "Client".to_string()))
}

pub async fn invoice_pdf(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RenderedDocument>> {
    let details = state.billing.invoices.get(id).await?;
    let name = client_name(&state, details.invoice.client_id).await?;
    Ok(Json(render_invoice(&details, &name)))
}

pub async fn receipt(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<RenderedDocument>> {
    let payment = state.billing.payments.get(payment_id).await?;
    let details = state.billing.invoices.get(payment.invoice_id).await?;
    let name = client_name(&state, details.invoice.client_id).await?;
    Ok(Json(render_receipt(
        &payment,
        &details.invoice.invoice_number,
        &name,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_outcome_shape() {
        let body = serde_json::to_value(FunctionOutcome::ok("User deleted")).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "User deleted");
        // absent fields are omitted, not null
        assert!(body.get("error").is_none());
    }
}
