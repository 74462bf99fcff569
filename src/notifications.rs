//! Notification outbox rows.
//!
//! The engine only writes rows; delivery (push, email) belongs to another service.
//! Rows are written inside the same unit as the state change they describe, so a
//! rolled-back change never leaves a stray notification behind.

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{
    Booking, BookingStatus, CreateNotification, EscrowRecord, NotificationType, Payment, PaymentStatus,
};

pub fn enqueue(conn: &Connection, items: &[CreateNotification]) -> Result<()> {
    for item in items {
        queries::create_notification(conn, item)?;
    }
    Ok(())
}

fn format_amount(cents: i64, currency: &str) -> String {
    format!("{}.{:02} {}", cents / 100, (cents % 100).abs(), currency.to_uppercase())
}

fn note(
    user_id: &str,
    notification_type: NotificationType,
    title: &str,
    message: String,
    related_id: &str,
) -> CreateNotification {
    CreateNotification {
        user_id: user_id.to_string(),
        title: title.to_string(),
        message,
        notification_type,
        related_id: Some(related_id.to_string()),
    }
}

/// Notifications for a payment reaching `status`. Pending produces none.
pub fn payment_status_changed(
    booking: &Booking,
    payment: &Payment,
    status: PaymentStatus,
) -> Vec<CreateNotification> {
    let amount = format_amount(payment.amount_cents, &payment.currency);
    match status {
        PaymentStatus::Approved => vec![
            note(
                &booking.customer_id,
                NotificationType::PaymentApproved,
                "Payment approved",
                format!("Your payment of {} was approved. Funds are held until the service is completed.", amount),
                &booking.id,
            ),
            note(
                &booking.provider_id,
                NotificationType::PaymentApproved,
                "Booking paid",
                format!("The customer paid {} for booking {}.", amount, booking.id),
                &booking.id,
            ),
        ],
        PaymentStatus::Rejected | PaymentStatus::Cancelled => vec![note(
            &booking.customer_id,
            NotificationType::PaymentFailed,
            "Payment failed",
            format!("Your payment of {} was {}.", amount, status),
            &booking.id,
        )],
        PaymentStatus::Refunded => vec![
            note(
                &booking.customer_id,
                NotificationType::PaymentRefunded,
                "Payment refunded",
                format!("Your payment of {} was refunded.", amount),
                &booking.id,
            ),
            note(
                &booking.provider_id,
                NotificationType::PaymentRefunded,
                "Booking refunded",
                format!("The payment for booking {} was refunded.", booking.id),
                &booking.id,
            ),
        ],
        PaymentStatus::Pending => Vec::new(),
    }
}

pub fn escrow_released(booking: &Booking, escrow: &EscrowRecord) -> Vec<CreateNotification> {
    vec![note(
        &booking.provider_id,
        NotificationType::EscrowReleased,
        "Payment released",
        format!(
            "{} has been released to you for booking {}.",
            format_amount(escrow.provider_amount_cents, &booking.currency),
            booking.id
        ),
        &booking.id,
    )]
}

/// The gateway refunded or charged back a payment after its escrow was released.
pub fn payout_reversed(booking: &Booking, escrow: &EscrowRecord) -> Vec<CreateNotification> {
    vec![note(
        &booking.provider_id,
        NotificationType::PayoutReversed,
        "Payment reversed",
        format!(
            "The payment for booking {} was reversed after {} was released to you.",
            booking.id,
            format_amount(escrow.provider_amount_cents, &booking.currency)
        ),
        &booking.id,
    )]
}

pub fn refund_processed(booking: &Booking, refund_amount_cents: i64, percent: i64) -> Vec<CreateNotification> {
    let amount = format_amount(refund_amount_cents, &booking.currency);
    vec![
        note(
            &booking.customer_id,
            NotificationType::PaymentRefunded,
            "Refund processed",
            format!("A {}% refund of {} was issued for booking {}.", percent, amount, booking.id),
            &booking.id,
        ),
        note(
            &booking.provider_id,
            NotificationType::PaymentRefunded,
            "Booking refunded",
            format!("Booking {} was cancelled and refunded.", booking.id),
            &booking.id,
        ),
    ]
}

pub fn booking_created(booking: &Booking) -> Vec<CreateNotification> {
    vec![note(
        &booking.provider_id,
        NotificationType::BookingCreated,
        "New booking request",
        format!(
            "New booking for {} at {} UTC.",
            booking.scheduled_date,
            booking.scheduled_time.format("%H:%M")
        ),
        &booking.id,
    )]
}

/// Tell the other side of the booking about a status change made by `actor_id`.
pub fn booking_status_changed(booking: &Booking, to: BookingStatus, actor_id: &str) -> Vec<CreateNotification> {
    let recipient = if actor_id == booking.provider_id {
        &booking.customer_id
    } else {
        &booking.provider_id
    };
    vec![note(
        recipient,
        NotificationType::BookingStatusChanged,
        "Booking updated",
        format!("Booking {} is now {}.", booking.id, to),
        &booking.id,
    )]
}
