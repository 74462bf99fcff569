//! Booking lock manager and lifecycle.
//!
//! Creation is serialized per slot: the unit of work holds the write lock while it
//! checks for a live booking at (provider, date, time) and inserts, and the partial
//! unique index on the same columns catches anything that slips past.
//!
//! PostgreSQL Migration Note: the IMMEDIATE transaction stands in for
//! `SELECT ... FROM bookings WHERE provider_id = $1 AND scheduled_date = $2
//! AND scheduled_time = $3 FOR UPDATE` before the conflict check.

use chrono::{DateTime, Months, Utc};
use rusqlite::{Connection, ErrorCode};

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{Booking, BookingStatus, CreateBooking};
use crate::notifications;

/// Check a slot is strictly in the future and no further out than `horizon_months`.
pub fn validate_schedule(scheduled_at: i64, now: i64, horizon_months: u32) -> Result<()> {
    if scheduled_at <= now {
        return Err(AppError::BadRequest(msg::SCHEDULED_IN_PAST.into()));
    }

    let horizon = DateTime::<Utc>::from_timestamp(now, 0)
        .and_then(|t| t.checked_add_months(Months::new(horizon_months)))
        .ok_or_else(|| AppError::Internal(format!("cannot compute booking horizon from {}", now)))?;

    if scheduled_at > horizon.timestamp() {
        return Err(AppError::BadRequest(msg::SCHEDULED_TOO_FAR.into()));
    }
    Ok(())
}

/// Create a booking in the slot, or report who already holds it.
///
/// Must run inside a unit of work.
pub fn create_booking(
    conn: &Connection,
    input: &CreateBooking,
    horizon_months: u32,
    now: i64,
) -> Result<Booking> {
    // 1. Conflict check under the write lock
    if let Some(existing) = queries::find_active_booking_for_slot(
        conn,
        &input.provider_id,
        input.scheduled_date,
        input.scheduled_time,
    )? {
        return Err(AppError::SlotTaken { booking_id: existing.id });
    }

    // 2. Validate the request itself
    if input.total_amount_cents <= 0 {
        return Err(AppError::BadRequest(msg::INVALID_AMOUNT.into()));
    }
    if input.duration_minutes <= 0 {
        return Err(AppError::BadRequest(msg::INVALID_DURATION.into()));
    }
    let scheduled_at = crate::models::scheduled_timestamp(input.scheduled_date, input.scheduled_time);
    validate_schedule(scheduled_at, now, horizon_months)?;

    // 3. Insert; the unique index is the last word on the slot
    let booking = match queries::insert_booking(conn, input) {
        Ok(b) => b,
        Err(e) if is_constraint_violation(&e) => {
            let holder = queries::find_booking_holding_slot(
                conn,
                &input.provider_id,
                input.scheduled_date,
                input.scheduled_time,
            )?;
            return match holder {
                Some(existing) => Err(AppError::SlotTaken { booking_id: existing.id }),
                None => Err(e),
            };
        }
        Err(e) => return Err(e),
    };

    notifications::enqueue(conn, &notifications::booking_created(&booking))?;

    tracing::info!(
        "Booking created: id={}, provider={}, slot={} {}",
        booking.id,
        booking.provider_id,
        booking.scheduled_date,
        booking.scheduled_time.format("%H:%M")
    );

    Ok(booking)
}

fn is_constraint_violation(e: &AppError) -> bool {
    matches!(
        e,
        AppError::Database(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation
    )
}

/// Move a booking along its lifecycle on behalf of `actor_id`.
///
/// The actor's role comes from the booking itself: the provider id makes them the
/// provider, the customer id the customer, anything else is refused.
pub fn transition_booking(
    conn: &Connection,
    booking_id: &str,
    actor_id: &str,
    to: BookingStatus,
) -> Result<Booking> {
    let booking = queries::get_booking_by_id(conn, booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;

    let role = booking
        .role_of(actor_id)
        .ok_or_else(|| AppError::Forbidden(msg::NOT_A_PARTICIPANT.into()))?;

    let from = booking.status;
    if !from.can_transition(to, role) {
        return Err(AppError::ForbiddenTransition { from, to, role });
    }

    if !queries::update_booking_status(conn, &booking.id, from, to)? {
        return Err(AppError::Conflict(format!(
            "booking {} changed while moving to {}",
            booking.id, to
        )));
    }

    notifications::enqueue(conn, &notifications::booking_status_changed(&booking, to, actor_id))?;

    tracing::info!("Booking {} moved {} -> {} by {} ({})", booking.id, from, to, actor_id, role);

    queries::get_booking_by_id(conn, &booking.id)?.or_not_found(msg::BOOKING_NOT_FOUND)
}
