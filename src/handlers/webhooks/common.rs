//! Webhook ingestion.
//!
//! Turns a validated gateway notification into local state exactly once:
//!
//! 1. Dedupe against the processed log for the same (data id, type). Only a
//!    delivery that moved the payment is logged as processed.
//! 2. Fetch the authoritative state from the gateway (no connection held).
//! 3. In one unit of work: re-check the dedupe, apply the payment transition
//!    (escrow hold, booking projection, notifications) and append the log row.
//! 4. On failure, roll back and append a `failed` row after the fact.
//!
//! Every path ends in exactly one appended log row.

use serde::Serialize;

use crate::db::{AppState, queries, run_in_pooled_transaction};
use crate::error::{AppError, Result};
use crate::models::{CreateWebhookLog, Payment, WebhookLogStatus};
use crate::payment_state::{self, StatusChange};
use crate::payments::GatewayPayment;

/// What a notification refers to, validated at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookNotification {
    Payment { data_id: String },
    MerchantOrder { data_id: String },
    /// A type this engine does not act on. Logged as skipped.
    Unhandled { notification_type: String, data_id: String },
}

impl WebhookNotification {
    pub fn notification_type(&self) -> &str {
        match self {
            WebhookNotification::Payment { .. } => "payment",
            WebhookNotification::MerchantOrder { .. } => "merchant_order",
            WebhookNotification::Unhandled { notification_type, .. } => notification_type,
        }
    }

    pub fn data_id(&self) -> &str {
        match self {
            WebhookNotification::Payment { data_id }
            | WebhookNotification::MerchantOrder { data_id }
            | WebhookNotification::Unhandled { data_id, .. } => data_id,
        }
    }
}

/// A delivery as received, ready for ingestion.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub webhook_id: String,
    pub action: Option<String>,
    pub notification: WebhookNotification,
    /// Raw payload, kept for the audit log.
    pub payload: serde_json::Value,
}

/// Result of ingesting one delivery. The transport acknowledges all of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    AlreadyProcessed,
    Skipped(String),
    Failed(String),
}

impl WebhookOutcome {
    fn log_status(&self) -> WebhookLogStatus {
        match self {
            WebhookOutcome::Processed => WebhookLogStatus::Processed,
            WebhookOutcome::AlreadyProcessed | WebhookOutcome::Skipped(_) => WebhookLogStatus::Skipped,
            WebhookOutcome::Failed(_) => WebhookLogStatus::Failed,
        }
    }
}

const ALREADY_PROCESSED: &str = "already processed";
const STATUS_UNCHANGED: &str = "status unchanged";

fn log_entry(envelope: &WebhookEnvelope, status: WebhookLogStatus, result: String) -> CreateWebhookLog {
    CreateWebhookLog {
        webhook_id: envelope.webhook_id.clone(),
        notification_type: envelope.notification.notification_type().to_string(),
        action: envelope.action.clone(),
        data_id: envelope.notification.data_id().to_string(),
        payload: envelope.payload.clone(),
        result: Some(result),
        status,
    }
}

/// Append a log row outside any unit of work. Used for outcomes that changed nothing.
fn append_log(state: &AppState, envelope: &WebhookEnvelope, outcome: WebhookOutcome, result: String) -> WebhookOutcome {
    let entry = log_entry(envelope, outcome.log_status(), result);
    let written = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::create_webhook_log(&conn, &entry));

    if let Err(e) = written {
        // The delivery is still acknowledged; the gateway's retry will log it again.
        tracing::error!(
            "Failed to record webhook {} ({} {}): {}",
            envelope.webhook_id,
            entry.notification_type,
            entry.data_id,
            e
        );
    }
    outcome
}

fn fail(state: &AppState, envelope: &WebhookEnvelope, error: &AppError) -> WebhookOutcome {
    tracing::warn!(
        "Webhook {} ({} {}) failed: {}",
        envelope.webhook_id,
        envelope.notification.notification_type(),
        envelope.notification.data_id(),
        error
    );
    let reason = error.to_string();
    append_log(state, envelope, WebhookOutcome::Failed(reason.clone()), reason)
}

/// Ingest one validated delivery.
pub async fn ingest(state: &AppState, envelope: WebhookEnvelope) -> WebhookOutcome {
    let notification_type = envelope.notification.notification_type().to_string();
    let data_id = envelope.notification.data_id().to_string();

    // 1. Fast-path dedupe. The connection goes back to the pool before any await.
    let seen = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|conn| queries::has_processed_webhook(&conn, &data_id, &notification_type));
    match seen {
        Ok(true) => {
            tracing::debug!("Webhook {} {} already processed", notification_type, data_id);
            return append_log(state, &envelope, WebhookOutcome::AlreadyProcessed, ALREADY_PROCESSED.into());
        }
        Ok(false) => {}
        Err(e) => return fail(state, &envelope, &e),
    }

    // 2. Authoritative fetch
    let fetched = match &envelope.notification {
        WebhookNotification::Payment { data_id } => {
            state.gateway.get_payment(data_id).await.map(|p| Some((p, None)))
        }
        WebhookNotification::MerchantOrder { data_id } => {
            state.gateway.get_merchant_order(data_id).await.map(|order| {
                let preference_id = order.preference_id.clone();
                order.decisive_payment().cloned().map(|p| (p, preference_id))
            })
        }
        WebhookNotification::Unhandled { notification_type, .. } => {
            let reason = format!("unhandled notification type '{}'", notification_type);
            return append_log(state, &envelope, WebhookOutcome::Skipped(reason.clone()), reason);
        }
    };

    let (gateway_payment, preference_id) = match fetched {
        Ok(Some(found)) => found,
        Ok(None) => {
            let reason = "merchant order has no payments yet".to_string();
            return append_log(state, &envelope, WebhookOutcome::Skipped(reason.clone()), reason);
        }
        Err(e) => return fail(state, &envelope, &e),
    };

    // 3. One unit of work
    let now = queries::now();
    let result = run_in_pooled_transaction(&state.db, |tx| {
        if queries::has_processed_webhook(tx, &data_id, &notification_type)? {
            queries::create_webhook_log(
                tx,
                &log_entry(&envelope, WebhookLogStatus::Skipped, ALREADY_PROCESSED.into()),
            )?;
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let payment = resolve_local_payment(tx, &gateway_payment, preference_id.as_deref())?;
        let change = payment_state::apply_status(
            tx,
            &payment.id,
            &gateway_payment.status_report(),
            &state.escrow,
            now,
        )?;

        // Only a transition counts as processed; a no-op must not shadow a later state
        let (outcome, summary) = match change {
            StatusChange::Transitioned { from, to } => (
                WebhookOutcome::Processed,
                format!("payment {} {} -> {}", payment.id, from, to),
            ),
            StatusChange::Unchanged { status } => (
                WebhookOutcome::Skipped(STATUS_UNCHANGED.into()),
                format!("payment {} {} ({})", payment.id, STATUS_UNCHANGED, status),
            ),
        };
        queries::create_webhook_log(tx, &log_entry(&envelope, outcome.log_status(), summary))?;
        Ok(outcome)
    });

    // 4. Failures are recorded after the rollback
    match result {
        Ok(outcome) => {
            tracing::info!(
                "Webhook {} ({} {}) via {}: {:?}",
                envelope.webhook_id,
                notification_type,
                data_id,
                state.gateway.name(),
                outcome
            );
            outcome
        }
        Err(e) => fail(state, &envelope, &e),
    }
}

/// Find the local payment a gateway payment belongs to.
///
/// The gateway transaction id wins once bound. Before that, the external reference
/// (the booking id set at checkout) leads to the booking's payment, and a merchant
/// order's preference id to the payment whose checkout opened it.
fn resolve_local_payment(
    conn: &rusqlite::Connection,
    gateway_payment: &GatewayPayment,
    preference_id: Option<&str>,
) -> Result<Payment> {
    if let Some(payment) = queries::get_payment_by_external_id(conn, &gateway_payment.id)? {
        return Ok(payment);
    }

    if let Some(reference) = gateway_payment.external_reference.as_deref() {
        return queries::get_payment_by_booking_id(conn, reference)?.ok_or_else(|| {
            AppError::NotFound(format!(
                "no local payment for booking {} (gateway payment {})",
                reference, gateway_payment.id
            ))
        });
    }

    if let Some(preference_id) = preference_id {
        if let Some(payment) = queries::get_payment_by_preference_id(conn, preference_id)? {
            return Ok(payment);
        }
    }

    Err(AppError::NotFound(format!(
        "gateway payment {} carries no reference to a local payment",
        gateway_payment.id
    )))
}
