//! Refund policy tests against the database

#[path = "../common/mod.rs"]
mod common;

use common::*;

fn request(actor_id: &str) -> RefundRequest {
    RefundRequest {
        actor_id: actor_id.to_string(),
        amount_cents: None,
        reason: Some("change of plans".to_string()),
    }
}

fn refund(
    conn: &mut rusqlite::Connection,
    payment_id: &str,
    request: &RefundRequest,
) -> bookpay::error::Result<refunds::RefundOutcome> {
    run_in_transaction(conn, |tx| {
        refunds::refund_payment(tx, payment_id, request, &RefundPolicy::default(), NOW)
    })
}

#[test]
fn test_full_refund_well_ahead_of_service() {
    let mut conn = setup_test_db();
    let (booking, payment) = create_paid_booking(&mut conn, NOW, 50, &EscrowPolicy::default());

    let outcome = refund(&mut conn, &payment.id, &request(CUSTOMER)).expect("Refund should be allowed");
    assert_eq!(outcome.refund_percent, 100);
    assert_eq!(outcome.refund_amount_cents, BOOKING_AMOUNT);
    assert_eq!(outcome.booking_status, BookingStatus::Cancelled);

    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booking.payment_status, BookingPaymentStatus::Refunded);

    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
}

#[test]
fn test_partial_refund_between_cutoffs() {
    let mut conn = setup_test_db();
    let (_, payment) = create_paid_booking(&mut conn, NOW, 30, &EscrowPolicy::default());

    let outcome = refund(&mut conn, &payment.id, &request(PROVIDER)).expect("Refund should be allowed");
    assert_eq!(outcome.refund_percent, 50);
    assert_eq!(outcome.refund_amount_cents, BOOKING_AMOUNT / 2);
}

#[test]
fn test_refund_inside_cutoff_is_blocked() {
    let mut conn = setup_test_db();
    let (booking, payment) = create_paid_booking(&mut conn, NOW, 10, &EscrowPolicy::default());

    let result = refund(&mut conn, &payment.id, &request(CUSTOMER));
    assert!(
        matches!(result, Err(AppError::RefundBlocked(RefundBlock::WithinCutoff { .. }))),
        "got {:?}",
        result
    );

    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);
}

#[test]
fn test_refund_of_started_service_is_blocked() {
    let mut conn = setup_test_db();
    let (booking, payment) = create_paid_booking(&mut conn, NOW, 72, &EscrowPolicy::default());
    advance_booking(&mut conn, &booking.id, BookingStatus::InProgress);

    let result = refund(&mut conn, &payment.id, &request(PROVIDER));
    assert!(matches!(
        result,
        Err(AppError::RefundBlocked(RefundBlock::BookingState(BookingStatus::InProgress)))
    ));
}

#[test]
fn test_stranger_cannot_refund() {
    let mut conn = setup_test_db();
    let (_, payment) = create_paid_booking(&mut conn, NOW, 72, &EscrowPolicy::default());

    let result = refund(&mut conn, &payment.id, &request(STRANGER));
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[test]
fn test_requested_amount_above_eligible_is_rejected() {
    let mut conn = setup_test_db();
    let (_, payment) = create_paid_booking(&mut conn, NOW, 30, &EscrowPolicy::default());

    let mut req = request(CUSTOMER);
    req.amount_cents = Some(BOOKING_AMOUNT);
    let result = refund(&mut conn, &payment.id, &req);
    assert!(matches!(result, Err(AppError::BadRequest(_))));

    req.amount_cents = Some(1_000);
    let outcome = refund(&mut conn, &payment.id, &req).expect("Smaller amount should be accepted");
    assert_eq!(outcome.refund_amount_cents, 1_000);
}

#[test]
fn test_second_refund_is_refused() {
    let mut conn = setup_test_db();
    let (_, payment) = create_paid_booking(&mut conn, NOW, 72, &EscrowPolicy::default());

    refund(&mut conn, &payment.id, &request(CUSTOMER)).unwrap();
    let result = refund(&mut conn, &payment.id, &request(CUSTOMER));
    assert!(result.is_err(), "A refunded payment cannot be refunded again");
    assert_eq!(
        queries::list_notifications_for_user(&conn, CUSTOMER)
            .unwrap()
            .iter()
            .filter(|n| n.title == "Refund processed")
            .count(),
        1
    );
}
