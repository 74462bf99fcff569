use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Query};
use crate::payments::verify_webhook_signature;

use super::common::{WebhookEnvelope, WebhookNotification, WebhookOutcome, ingest};

/// Query-string form of a notification. Mercado Pago appends these to the
/// notification URL, and the older IPN format sends nothing else.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub topic: Option<String>,
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub webhook_id: String,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

/// Read an id that may be a JSON string or number.
fn id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Last path segment of a `resource` URL (`https://api.mercadopago.com/v1/payments/123`).
fn resource_id(value: Option<&Value>) -> Option<String> {
    let resource = value?.as_str()?;
    let last = resource.trim_end_matches('/').rsplit('/').next()?;
    (!last.is_empty()).then(|| last.to_string())
}

/// Validate a delivery and classify it. Nothing is logged for a delivery that fails here.
pub fn parse_notification(query: &WebhookQuery, body: &[u8]) -> Result<WebhookEnvelope> {
    let payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?
    };

    let notification_type = payload
        .get("type")
        .or_else(|| payload.get("topic"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| query.notification_type.clone())
        .or_else(|| query.topic.clone())
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest(msg::WEBHOOK_MISSING_TYPE.into()))?;

    let data_id = id_value(payload.get("data").and_then(|d| d.get("id")))
        .or_else(|| resource_id(payload.get("resource")))
        .or_else(|| query.data_id.clone())
        .or_else(|| query.id.clone())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest(msg::WEBHOOK_MISSING_DATA_ID.into()))?;

    // Body-level `id` is the notification's own id, not the resource's
    let webhook_id = id_value(payload.get("id"))
        .filter(|_| payload.get("data").is_some())
        .unwrap_or_else(|| format!("mp_{}", Uuid::new_v4().as_simple()));

    let action = payload.get("action").and_then(Value::as_str).map(str::to_string);

    let notification = match notification_type.as_str() {
        "payment" => WebhookNotification::Payment { data_id },
        "merchant_order" | "topic_merchant_order_wh" => WebhookNotification::MerchantOrder { data_id },
        _ => WebhookNotification::Unhandled {
            notification_type,
            data_id,
        },
    };

    let payload = if payload.is_null() {
        serde_json::json!({
            "type": query.notification_type,
            "topic": query.topic,
            "data.id": query.data_id,
            "id": query.id,
        })
    } else {
        payload
    };

    Ok(WebhookEnvelope {
        webhook_id,
        action,
        notification,
        payload,
    })
}

fn check_signature(state: &AppState, headers: &HeaderMap, data_id: &str) -> Result<()> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Ok(());
    };

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let request_id = headers.get("x-request-id").and_then(|v| v.to_str().ok());

    let now = chrono::Utc::now().timestamp();
    match verify_webhook_signature(secret, signature, request_id, data_id, now) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!("Mercado Pago webhook signature mismatch for data.id {}", data_id);
            Err(AppError::Unauthorized)
        }
        Err(e) => {
            tracing::warn!("Mercado Pago webhook signature rejected: {}", e);
            Err(AppError::Unauthorized)
        }
    }
}

/// `POST /webhooks/mercadopago`
///
/// Malformed deliveries get 400 and bad signatures 401, neither logged. Everything
/// else is acknowledged with 200 and the ingestion outcome: the gateway retries
/// non-2xx responses, and failures are already durable in the webhook log.
pub async fn handle_mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let envelope = parse_notification(&query, &body)?;
    check_signature(&state, &headers, envelope.notification.data_id())?;

    let webhook_id = envelope.webhook_id.clone();
    let outcome = ingest(&state, envelope).await;

    Ok(Json(WebhookAck {
        received: true,
        webhook_id,
        outcome,
    }))
}
