use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::bookings;
use crate::db::{AppState, queries, run_in_pooled_transaction};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::escrow;
use crate::extractors::{EntityId, Json};
use crate::models::{
    Booking, BookingStatus, CreateBooking, EscrowRecord, Payment, ReleaseSummary, parse_slot_date,
    parse_slot_time,
};

/// Booking request from the scheduling workflow. Date and time are UTC.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub customer_id: String,
    pub provider_id: String,
    pub service_id: String,
    /// `YYYY-MM-DD`
    pub scheduled_date: String,
    /// `HH:MM`
    pub scheduled_time: String,
    pub duration_minutes: i32,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub total_amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "brl".to_string()
}

impl CreateBookingRequest {
    fn into_booking(self) -> Result<CreateBooking> {
        let scheduled_date = parse_slot_date(&self.scheduled_date)
            .ok_or_else(|| AppError::BadRequest(msg::INVALID_DATE.into()))?;
        let scheduled_time = parse_slot_time(&self.scheduled_time)
            .ok_or_else(|| AppError::BadRequest(msg::INVALID_TIME.into()))?;

        Ok(CreateBooking {
            customer_id: self.customer_id,
            provider_id: self.provider_id,
            service_id: self.service_id,
            scheduled_date,
            scheduled_time,
            duration_minutes: self.duration_minutes,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            notes: self.notes,
            total_amount_cents: self.total_amount_cents,
            currency: self.currency.to_lowercase(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BookingDetail {
    #[serde(flatten)]
    pub booking: Booking,
    pub payment: Option<Payment>,
    pub escrow: Option<EscrowRecord>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingStatusRequest {
    pub actor_id: String,
    pub status: BookingStatus,
}

/// `POST /bookings`
pub async fn create_booking(
    State(state): State<AppState>,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>)> {
    let input = request.into_booking()?;
    let now = queries::now();

    let booking = run_in_pooled_transaction(&state.db, |tx| {
        bookings::create_booking(tx, &input, state.booking_horizon_months, now)
    })?;

    Ok((StatusCode::CREATED, Json(booking)))
}

/// `GET /bookings/{id}`
pub async fn get_booking(
    State(state): State<AppState>,
    EntityId(id): EntityId,
) -> Result<Json<BookingDetail>> {
    let conn = state.db.get()?;

    let booking = queries::get_booking_by_id(&conn, &id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;
    let payment = queries::get_payment_by_booking_id(&conn, &booking.id)?;
    let escrow = match &payment {
        Some(p) => queries::get_escrow_by_payment_id(&conn, &p.id)?,
        None => None,
    };

    Ok(Json(BookingDetail {
        booking,
        payment,
        escrow,
    }))
}

/// `POST /bookings/{id}/status`
pub async fn update_booking_status(
    State(state): State<AppState>,
    EntityId(id): EntityId,
    Json(request): Json<UpdateBookingStatusRequest>,
) -> Result<Json<Booking>> {
    let booking = run_in_pooled_transaction(&state.db, |tx| {
        bookings::transition_booking(tx, &id, &request.actor_id, request.status)
    })?;
    Ok(Json(booking))
}

/// `POST /bookings/{id}/release`
///
/// Releases held escrow to the provider once the service has been delivered.
pub async fn release_escrow(
    State(state): State<AppState>,
    EntityId(id): EntityId,
) -> Result<Json<ReleaseSummary>> {
    let summary = run_in_pooled_transaction(&state.db, |tx| {
        let booking = queries::get_booking_by_id(tx, &id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;
        if booking.status != BookingStatus::Completed {
            return Err(AppError::Conflict(msg::BOOKING_NOT_COMPLETED.into()));
        }
        escrow::release(tx, &booking.id)
    })?;
    Ok(Json(summary))
}
