//! Escrow ledger: platform fee split and the hold → release / refund lifecycle.
//!
//! Every function here takes a connection that is expected to be inside a unit of
//! work (see [`crate::db::run_in_transaction`]); none of them commit on their own.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::models::{
    BookingPaymentStatus, EscrowRecord, EscrowStatus, Payment, PaymentStatus, ReleaseSummary,
};
use crate::notifications;

const SECONDS_PER_DAY: i64 = 86_400;

/// Fee and hold settings applied to every escrow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscrowPolicy {
    /// Platform share of each payment, in `[0, 1)`.
    pub fee_rate: f64,
    pub hold_days: i64,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            fee_rate: 0.0,
            hold_days: 30,
        }
    }
}

/// How a payment amount divides between platform and provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub provider_amount_cents: i64,
}

impl EscrowPolicy {
    /// Split `total_cents`. The fee is rounded to the nearest cent and the provider
    /// gets the remainder, so the two parts always add back up to the total.
    pub fn split(&self, total_cents: i64) -> FeeSplit {
        let fee = ((total_cents as f64) * self.fee_rate).round() as i64;
        let fee = fee.clamp(0, total_cents.max(0));
        FeeSplit {
            total_amount_cents: total_cents,
            platform_fee_cents: fee,
            provider_amount_cents: total_cents - fee,
        }
    }

    pub fn hold_until(&self, from: i64) -> i64 {
        from.saturating_add(self.hold_days.saturating_mul(SECONDS_PER_DAY))
    }
}

/// Hold an approved payment's funds.
///
/// Re-holding refreshes the split of an escrow that is still held; a released or
/// refunded escrow is returned unchanged.
pub fn create_hold(
    conn: &Connection,
    payment: &Payment,
    policy: &EscrowPolicy,
    now: i64,
) -> Result<EscrowRecord> {
    let split = policy.split(payment.amount_cents);

    let escrow = queries::upsert_escrow_hold(
        conn,
        &payment.id,
        split.total_amount_cents,
        split.platform_fee_cents,
        split.provider_amount_cents,
        policy.hold_until(now),
    )?
    .ok_or_else(|| AppError::Internal(format!("escrow for payment {} vanished after upsert", payment.id)))?;

    if escrow.status != EscrowStatus::Held {
        tracing::warn!(
            "Escrow {} for payment {} is already {}, hold not refreshed",
            escrow.id,
            payment.id,
            escrow.status
        );
    } else {
        tracing::info!(
            "Escrow held: escrow={}, payment={}, total={}, fee={}, provider={}",
            escrow.id,
            payment.id,
            escrow.total_amount_cents,
            escrow.platform_fee_cents,
            escrow.provider_amount_cents
        );
    }

    Ok(escrow)
}

/// Release a booking's held escrow to the provider.
///
/// The escrow is claimed with a compare-and-set before any ledger row is written,
/// so a second release of the same escrow writes nothing and reports `NoHeldEscrow`.
pub fn release(conn: &Connection, booking_id: &str) -> Result<ReleaseSummary> {
    let booking = queries::get_booking_by_id(conn, booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;

    let payment = queries::get_payment_by_booking_id(conn, booking_id)?
        .ok_or_else(|| AppError::NoHeldEscrow(booking_id.to_string()))?;
    let escrow = queries::get_escrow_by_payment_id(conn, &payment.id)?
        .ok_or_else(|| AppError::NoHeldEscrow(booking_id.to_string()))?;

    if escrow.status != EscrowStatus::Held || !queries::mark_escrow_released(conn, &escrow.id)? {
        return Err(AppError::NoHeldEscrow(booking_id.to_string()));
    }

    let payout = queries::create_provider_payout(
        conn,
        &booking.provider_id,
        &booking.id,
        &escrow.id,
        escrow.provider_amount_cents,
        &payment.currency,
    )?;
    let revenue = queries::create_platform_revenue(
        conn,
        &booking.id,
        &escrow.id,
        escrow.platform_fee_cents,
        &payment.currency,
    )?;

    queries::set_booking_payment_status(conn, &booking.id, BookingPaymentStatus::Completed)?;
    notifications::enqueue(conn, &notifications::escrow_released(&booking, &escrow))?;

    tracing::info!(
        "Escrow released: escrow={}, booking={}, provider={} gets {}, platform fee {}",
        escrow.id,
        booking.id,
        booking.provider_id,
        escrow.provider_amount_cents,
        escrow.platform_fee_cents
    );

    Ok(ReleaseSummary {
        escrow_id: escrow.id,
        booking_id: booking.id,
        payout_id: payout.id,
        revenue_id: revenue.id,
        total_amount_cents: escrow.total_amount_cents,
        platform_fee_cents: escrow.platform_fee_cents,
        provider_amount_cents: escrow.provider_amount_cents,
    })
}

/// Reverse an approved payment whose funds are still in escrow.
pub fn refund(conn: &Connection, payment_id: &str) -> Result<EscrowRecord> {
    let payment = queries::get_payment_by_id(conn, payment_id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;

    if payment.status != PaymentStatus::Approved {
        return Err(AppError::InvalidTransition {
            from: payment.status,
            to: PaymentStatus::Refunded,
        });
    }

    let escrow = queries::get_escrow_by_payment_id(conn, payment_id)?
        .ok_or_else(|| AppError::NoHeldEscrow(payment.booking_id.clone()))?;

    match escrow.status {
        EscrowStatus::Held => {}
        EscrowStatus::Released => return Err(AppError::AlreadyReleased(payment_id.to_string())),
        EscrowStatus::Refunded => return Err(AppError::NoHeldEscrow(payment.booking_id.clone())),
    }

    if !queries::mark_escrow_refunded(conn, &escrow.id)? {
        return Err(AppError::NoHeldEscrow(payment.booking_id.clone()));
    }
    if !queries::update_payment_status(
        conn,
        payment_id,
        PaymentStatus::Approved,
        PaymentStatus::Refunded,
        None,
    )? {
        return Err(AppError::Conflict(format!(
            "payment {} changed while being refunded",
            payment_id
        )));
    }
    queries::set_booking_payment_status(
        conn,
        &payment.booking_id,
        PaymentStatus::Refunded.booking_projection(),
    )?;

    tracing::info!(
        "Escrow refunded: escrow={}, payment={}, amount={}",
        escrow.id,
        payment_id,
        escrow.total_amount_cents
    );

    queries::get_escrow_by_id(conn, &escrow.id)?.or_not_found(msg::ESCROW_NOT_FOUND)
}
