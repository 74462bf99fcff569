//! Payment state machine.
//!
//! Applies a reported status to a payment inside an open unit of work and keeps
//! everything that mirrors it in step: the booking's `payment_status`, the escrow
//! hold, and the outbox notifications.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, OptionExt, Result, msg};
use crate::escrow::{self, EscrowPolicy};
use crate::models::{EscrowStatus, GatewayMetadata, PaymentStatus};
use crate::notifications;

/// A status claim about a payment, from the gateway or an operator.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub status: PaymentStatus,
    /// Gateway transaction id, bound to the payment on first sight.
    pub external_id: Option<String>,
    /// Amount the gateway says was charged.
    pub amount_cents: Option<i64>,
    pub metadata: Option<GatewayMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StatusChange {
    /// The payment already had the reported status.
    Unchanged { status: PaymentStatus },
    Transitioned { from: PaymentStatus, to: PaymentStatus },
}

/// Apply `report` to the payment. Must run inside a unit of work: any error
/// leaves the unit to roll back every write made here.
pub fn apply_status(
    conn: &Connection,
    payment_id: &str,
    report: &StatusReport,
    escrow_policy: &EscrowPolicy,
    now: i64,
) -> Result<StatusChange> {
    let payment = queries::get_payment_by_id(conn, payment_id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;
    let booking =
        queries::get_booking_by_id(conn, &payment.booking_id)?.or_not_found(msg::BOOKING_NOT_FOUND)?;

    // 1. Bind the gateway transaction id (written once)
    if let Some(external_id) = report.external_id.as_deref() {
        match payment.external_id.as_deref() {
            None => {
                if !queries::set_payment_external_id(conn, &payment.id, external_id)? {
                    return Err(AppError::Conflict(format!(
                        "payment {} was bound to another gateway transaction concurrently",
                        payment.id
                    )));
                }
            }
            Some(existing) if existing == external_id => {}
            Some(existing) => {
                return Err(AppError::Conflict(format!(
                    "payment {} is bound to gateway transaction {}, refusing {}",
                    payment.id, existing, external_id
                )));
            }
        }
    }

    let from = payment.status;
    let to = report.status;

    // 2. Same status again: keep metadata fresh, change nothing else
    if from == to {
        if let Some(metadata) = &report.metadata {
            queries::update_payment_metadata(conn, &payment.id, metadata)?;
        }
        tracing::debug!("Payment {} already {}, nothing to apply", payment.id, from);
        return Ok(StatusChange::Unchanged { status: from });
    }

    if !from.can_transition_to(to) {
        return Err(AppError::InvalidTransition { from, to });
    }

    // 3. Never approve on less money than the booking costs
    if to == PaymentStatus::Approved {
        if let Some(reported) = report.amount_cents {
            if reported < payment.amount_cents {
                return Err(AppError::Conflict(format!(
                    "amount mismatch: gateway approved {} but payment {} expects {}",
                    reported, payment.id, payment.amount_cents
                )));
            }
        }
    }

    // 4. Payment row and booking projection move together
    if !queries::update_payment_status(conn, &payment.id, from, to, report.metadata.as_ref())? {
        return Err(AppError::Conflict(format!(
            "payment {} changed while applying {}",
            payment.id, to
        )));
    }
    queries::set_booking_payment_status(conn, &booking.id, to.booking_projection())?;

    // 5. Escrow follows the money
    match to {
        PaymentStatus::Approved => {
            escrow::create_hold(conn, &payment, escrow_policy, now)?;
        }
        PaymentStatus::Refunded => match queries::get_escrow_by_payment_id(conn, &payment.id)? {
            Some(record) if record.status == EscrowStatus::Held => {
                queries::mark_escrow_refunded(conn, &record.id)?;
            }
            Some(record) => {
                tracing::warn!(
                    "Payment {} refunded at the gateway but escrow {} is already {}; ledger left as is",
                    payment.id,
                    record.id,
                    record.status
                );
                if record.status == EscrowStatus::Released {
                    notifications::enqueue(conn, &notifications::payout_reversed(&booking, &record))?;
                }
            }
            None => {
                tracing::warn!("Payment {} refunded at the gateway with no escrow on record", payment.id);
            }
        },
        PaymentStatus::Pending | PaymentStatus::Rejected | PaymentStatus::Cancelled => {}
    }

    // 6. Outbox
    notifications::enqueue(conn, &notifications::payment_status_changed(&booking, &payment, to))?;

    tracing::info!(
        "Payment {} moved {} -> {} (booking {} now {})",
        payment.id,
        from,
        to,
        booking.id,
        to.booking_projection()
    );

    Ok(StatusChange::Transitioned { from, to })
}
