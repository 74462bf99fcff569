//! Refund coordinator.
//!
//! Eligibility is a pure function of the booking, the amount and the clock; the
//! reversal itself runs through the escrow ledger and the booking lifecycle inside
//! one unit of work.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::error::{AppError, OptionExt, RefundBlock, Result, msg};
use crate::escrow;
use crate::models::{Booking, BookingStatus};
use crate::notifications;

const SECONDS_PER_HOUR: i64 = 3_600;

/// Cancellation refund rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    /// No refund when the service starts sooner than this.
    pub cutoff_hours: i64,
    /// Full refund when the service is at least this far away.
    pub full_refund_hours: i64,
    /// Refund share between the cutoff and the full-refund window.
    pub partial_refund_percent: i64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            cutoff_hours: 24,
            full_refund_hours: 48,
            partial_refund_percent: 50,
        }
    }
}

/// What the policy allows for a given booking at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundDecision {
    pub refund_percent: i64,
    pub eligible_amount_cents: i64,
    /// Whole hours left before the scheduled start, rounded down.
    pub hours_until_service: i64,
}

impl RefundPolicy {
    pub fn evaluate(
        &self,
        booking: &Booking,
        amount_cents: i64,
        now: i64,
    ) -> std::result::Result<RefundDecision, RefundBlock> {
        if matches!(booking.status, BookingStatus::InProgress | BookingStatus::Completed) {
            return Err(RefundBlock::BookingState(booking.status));
        }

        let seconds_until = booking.scheduled_at() - now;
        let hours_until_service = seconds_until.div_euclid(SECONDS_PER_HOUR);

        if seconds_until < self.cutoff_hours * SECONDS_PER_HOUR {
            return Err(RefundBlock::WithinCutoff {
                hours_until_service,
                cutoff_hours: self.cutoff_hours,
            });
        }

        let refund_percent = if seconds_until >= self.full_refund_hours * SECONDS_PER_HOUR {
            100
        } else {
            self.partial_refund_percent
        };

        Ok(RefundDecision {
            refund_percent,
            eligible_amount_cents: amount_cents * refund_percent / 100,
            hours_until_service,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub actor_id: String,
    /// Refund less than the eligible amount. Must be positive.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub payment_id: String,
    pub booking_id: String,
    pub escrow_id: String,
    pub refund_percent: i64,
    pub refund_amount_cents: i64,
    pub booking_status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Refund a payment on behalf of one of the booking's participants.
///
/// Runs inside a unit of work: policy check, escrow reversal, booking cancellation
/// and the refunded projection commit together or not at all.
pub fn refund_payment(
    conn: &Connection,
    payment_id: &str,
    request: &RefundRequest,
    policy: &RefundPolicy,
    now: i64,
) -> Result<RefundOutcome> {
    let payment = queries::get_payment_by_id(conn, payment_id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;
    let booking =
        queries::get_booking_by_id(conn, &payment.booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;

    let role = booking
        .role_of(&request.actor_id)
        .ok_or_else(|| AppError::Forbidden(msg::NOT_A_PARTICIPANT.into()))?;

    let decision = policy
        .evaluate(&booking, payment.amount_cents, now)
        .map_err(AppError::RefundBlocked)?;

    let refund_amount_cents = match request.amount_cents {
        None => decision.eligible_amount_cents,
        Some(amount) if amount <= 0 => return Err(AppError::BadRequest(msg::INVALID_AMOUNT.into())),
        Some(amount) if amount > decision.eligible_amount_cents => {
            return Err(AppError::BadRequest(format!(
                "Requested refund of {} exceeds the eligible {} ({}%)",
                amount, decision.eligible_amount_cents, decision.refund_percent
            )));
        }
        Some(amount) => amount,
    };

    let escrow = escrow::refund(conn, &payment.id)?;

    let mut booking_status = booking.status;
    if matches!(booking.status, BookingStatus::Pending | BookingStatus::Confirmed) {
        if !booking.status.can_transition(BookingStatus::Cancelled, role) {
            return Err(AppError::ForbiddenTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
                role,
            });
        }
        if !queries::update_booking_status(conn, &booking.id, booking.status, BookingStatus::Cancelled)? {
            return Err(AppError::Conflict(format!(
                "booking {} changed while being refunded",
                booking.id
            )));
        }
        booking_status = BookingStatus::Cancelled;
    }

    notifications::enqueue(
        conn,
        &notifications::refund_processed(&booking, refund_amount_cents, decision.refund_percent),
    )?;

    tracing::info!(
        "Refund issued: payment={}, booking={}, {}% = {} by {} ({}){}",
        payment.id,
        booking.id,
        decision.refund_percent,
        refund_amount_cents,
        request.actor_id,
        role,
        request
            .reason
            .as_deref()
            .map(|r| format!(", reason: {}", r))
            .unwrap_or_default()
    );

    Ok(RefundOutcome {
        payment_id: payment.id,
        booking_id: booking.id,
        escrow_id: escrow.id,
        refund_percent: decision.refund_percent,
        refund_amount_cents,
        booking_status,
        reason: request.reason.clone(),
    })
}
