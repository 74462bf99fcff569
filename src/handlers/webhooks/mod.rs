pub mod common;
pub mod mercadopago;

pub use mercadopago::handle_mercadopago_webhook;

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::models::{WebhookLog, WebhookLogStatus};

#[derive(Debug, Serialize)]
pub struct WebhookStatusResponse {
    pub webhook_id: String,
    /// Status of the most recent delivery.
    pub status: WebhookLogStatus,
    pub deliveries: Vec<WebhookLog>,
}

/// `GET /webhooks/{webhook_id}/status`
pub async fn get_webhook_status(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Result<Json<WebhookStatusResponse>> {
    let conn = state.db.get()?;
    let deliveries = queries::list_webhook_logs_by_webhook_id(&conn, &webhook_id)?;

    let status = deliveries
        .last()
        .map(|log| log.status)
        .ok_or_else(|| AppError::NotFound(msg::WEBHOOK_NOT_FOUND.into()))?;

    Ok(Json(WebhookStatusResponse {
        webhook_id,
        status,
        deliveries,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/mercadopago", post(handle_mercadopago_webhook))
        .route("/webhooks/{webhook_id}/status", get(get_webhook_status))
}
