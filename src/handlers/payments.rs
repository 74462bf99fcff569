use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries, run_in_pooled_transaction};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{EntityId, Json};
use crate::models::{BookingStatus, CreatePayment, EscrowRecord, Payment, PaymentStatus};
use crate::payment_state::{self, StatusChange, StatusReport};
use crate::payments::CheckoutRequest;
use crate::refunds::{self, RefundOutcome, RefundRequest};

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub payment: Payment,
    pub preference_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    pub escrow: Option<EscrowRecord>,
}

/// Operator-reported status, for payments settled outside the webhook flow.
#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub status: PaymentStatus,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct UpdatePaymentStatusResponse {
    pub payment: Payment,
    #[serde(flatten)]
    pub change: StatusChange,
}

/// `POST /payments`
///
/// Records a pending payment for the booking, then opens a checkout with the
/// gateway. The gateway call happens after the payment row is committed; if it
/// fails, retrying the request reuses the same pending payment.
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePayment>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>)> {
    let (booking, payment) = run_in_pooled_transaction(&state.db, |tx| {
        let booking =
            queries::get_booking_by_id(tx, &request.booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;

        if request.customer_id != booking.customer_id {
            return Err(AppError::Forbidden(msg::NOT_THE_CUSTOMER.into()));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(AppError::Conflict(msg::BOOKING_NOT_CONFIRMED.into()));
        }

        let payment = match queries::get_payment_by_booking_id(tx, &booking.id)? {
            // Checkout never opened: let the caller retry it
            Some(existing) if existing.status == PaymentStatus::Pending && existing.preference_id.is_none() => {
                existing
            }
            Some(existing) => return Err(AppError::PaymentExists { payment_id: existing.id }),
            None => queries::create_payment(tx, &booking, request.payment_method.as_deref())?,
        };
        Ok((booking, payment))
    })?;

    let checkout = state
        .gateway
        .create_checkout(&CheckoutRequest {
            payment_id: payment.id.clone(),
            booking_id: booking.id.clone(),
            title: format!("Booking {} on {}", booking.service_id, booking.scheduled_date),
            amount_cents: payment.amount_cents,
            currency: payment.currency.clone(),
            payer_id: booking.customer_id.clone(),
            notification_url: format!("{}/webhooks/mercadopago", state.base_url),
            success_url: format!("{}/bookings/{}?payment=success", state.base_url, booking.id),
            failure_url: format!("{}/bookings/{}?payment=failure", state.base_url, booking.id),
            pending_url: format!("{}/bookings/{}?payment=pending", state.base_url, booking.id),
        })
        .await?;

    let conn = state.db.get()?;
    queries::set_payment_preference_id(&conn, &payment.id, &checkout.preference_id)?;
    let payment = queries::get_payment_by_id(&conn, &payment.id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;

    tracing::info!(
        "Checkout opened: payment={}, booking={}, preference={}",
        payment.id,
        booking.id,
        checkout.preference_id
    );

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentResponse {
            payment,
            preference_id: checkout.preference_id,
            checkout_url: checkout.checkout_url,
        }),
    ))
}

/// `GET /payments/{id}`
pub async fn get_payment(
    State(state): State<AppState>,
    EntityId(id): EntityId,
) -> Result<Json<PaymentDetail>> {
    let conn = state.db.get()?;
    let payment = queries::get_payment_by_id(&conn, &id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;
    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id)?;
    Ok(Json(PaymentDetail { payment, escrow }))
}

/// `POST /payments/{id}/status`
pub async fn update_payment_status(
    State(state): State<AppState>,
    EntityId(id): EntityId,
    Json(request): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<UpdatePaymentStatusResponse>> {
    let report = StatusReport {
        status: request.status,
        external_id: request.external_id,
        amount_cents: request.amount_cents,
        metadata: None,
    };
    let now = queries::now();

    let (payment, change) = run_in_pooled_transaction(&state.db, |tx| {
        let change = payment_state::apply_status(tx, &id, &report, &state.escrow, now)?;
        let payment = queries::get_payment_by_id(tx, &id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;
        Ok((payment, change))
    })?;

    Ok(Json(UpdatePaymentStatusResponse { payment, change }))
}

/// `POST /payments/{id}/refund`
pub async fn refund_payment(
    State(state): State<AppState>,
    EntityId(id): EntityId,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundOutcome>> {
    let now = queries::now();
    let outcome = run_in_pooled_transaction(&state.db, |tx| {
        refunds::refund_payment(tx, &id, &request, &state.refunds, now)
    })?;
    Ok(Json(outcome))
}
