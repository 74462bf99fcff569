//! Payment state machine tests

#[path = "../common/mod.rs"]
mod common;

use common::*;

fn pending_payment(conn: &mut rusqlite::Connection) -> (Booking, Payment) {
    let booking = create_test_booking(conn, NOW, 48);
    advance_booking(conn, &booking.id, BookingStatus::Confirmed);
    let payment = create_test_payment(conn, &booking);
    (booking, payment)
}

#[test]
fn test_approval_holds_escrow_and_marks_booking_paid() {
    let mut conn = setup_test_db();
    let (booking, payment) = pending_payment(&mut conn);
    let policy = EscrowPolicy {
        fee_rate: 0.15,
        hold_days: 30,
    };

    let change = report_status(&mut conn, &payment.id, PaymentStatus::Approved, "mp_1", BOOKING_AMOUNT, &policy, NOW)
        .expect("Approval should apply");
    assert_eq!(
        change,
        StatusChange::Transitioned {
            from: PaymentStatus::Pending,
            to: PaymentStatus::Approved
        }
    );

    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.external_id.as_deref(), Some("mp_1"));

    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);

    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);
    assert_eq!(escrow.total_amount_cents, 10_000);
    assert_eq!(escrow.platform_fee_cents, 1_500);
    assert_eq!(escrow.provider_amount_cents, 8_500);
    assert_eq!(escrow.hold_until, NOW + 30 * ONE_DAY);

    let customer_notes = queries::list_notifications_for_user(&conn, CUSTOMER).unwrap();
    assert!(customer_notes.iter().any(|n| n.notification_type == NotificationType::PaymentApproved));
    let provider_notes = queries::list_notifications_for_user(&conn, PROVIDER).unwrap();
    assert!(provider_notes.iter().any(|n| n.notification_type == NotificationType::PaymentApproved));
}

#[test]
fn test_repeated_approval_is_unchanged() {
    let mut conn = setup_test_db();
    let (_, payment) = pending_payment(&mut conn);
    let policy = EscrowPolicy::default();

    report_status(&mut conn, &payment.id, PaymentStatus::Approved, "mp_1", BOOKING_AMOUNT, &policy, NOW).unwrap();
    let notes_after_first = count_rows(&conn, "notifications");

    let change = report_status(&mut conn, &payment.id, PaymentStatus::Approved, "mp_1", BOOKING_AMOUNT, &policy, NOW)
        .expect("Repeat should be a no-op, not an error");
    assert_eq!(
        change,
        StatusChange::Unchanged {
            status: PaymentStatus::Approved
        }
    );
    assert_eq!(count_rows(&conn, "escrow_records"), 1);
    assert_eq!(count_rows(&conn, "notifications"), notes_after_first);
}

#[test]
fn test_overpayment_is_accepted() {
    let mut conn = setup_test_db();
    let (_, payment) = pending_payment(&mut conn);

    report_status(
        &mut conn,
        &payment.id,
        PaymentStatus::Approved,
        "mp_1",
        BOOKING_AMOUNT + 1,
        &EscrowPolicy::default(),
        NOW,
    )
    .expect("Paying more than the booking costs is not a mismatch");
}

#[test]
fn test_rejection_marks_booking_failed_without_escrow() {
    let mut conn = setup_test_db();
    let (booking, payment) = pending_payment(&mut conn);

    report_status(&mut conn, &payment.id, PaymentStatus::Rejected, "mp_1", BOOKING_AMOUNT, &EscrowPolicy::default(), NOW)
        .expect("Rejection should apply");

    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.payment_status, BookingPaymentStatus::Failed);
    assert!(queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().is_none());
}

#[test]
fn test_terminal_payment_refuses_transition() {
    let mut conn = setup_test_db();
    let (_, payment) = pending_payment(&mut conn);
    let policy = EscrowPolicy::default();

    report_status(&mut conn, &payment.id, PaymentStatus::Rejected, "mp_1", BOOKING_AMOUNT, &policy, NOW).unwrap();
    let result = report_status(&mut conn, &payment.id, PaymentStatus::Approved, "mp_1", BOOKING_AMOUNT, &policy, NOW);

    assert!(matches!(
        result,
        Err(AppError::InvalidTransition {
            from: PaymentStatus::Rejected,
            to: PaymentStatus::Approved
        })
    ));
    assert!(queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().is_none());
}

#[test]
fn test_approved_cannot_go_back_to_pending() {
    let mut conn = setup_test_db();
    let (_, payment) = pending_payment(&mut conn);
    let policy = EscrowPolicy::default();

    report_status(&mut conn, &payment.id, PaymentStatus::Approved, "mp_1", BOOKING_AMOUNT, &policy, NOW).unwrap();
    let result = report_status(&mut conn, &payment.id, PaymentStatus::Pending, "mp_1", BOOKING_AMOUNT, &policy, NOW);
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
}

#[test]
fn test_foreign_gateway_transaction_is_refused() {
    let mut conn = setup_test_db();
    let (_, payment) = pending_payment(&mut conn);
    let policy = EscrowPolicy::default();

    report_status(&mut conn, &payment.id, PaymentStatus::Pending, "mp_1", BOOKING_AMOUNT, &policy, NOW).unwrap();
    let result = report_status(&mut conn, &payment.id, PaymentStatus::Approved, "mp_2", BOOKING_AMOUNT, &policy, NOW);

    assert!(matches!(result, Err(AppError::Conflict(_))));
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.external_id.as_deref(), Some("mp_1"));
}

#[test]
fn test_gateway_refund_of_held_escrow_marks_it_refunded() {
    let mut conn = setup_test_db();
    let policy = EscrowPolicy::default();
    let (booking, payment) = create_paid_booking(&mut conn, NOW, 48, &policy);

    report_status(&mut conn, &payment.id, PaymentStatus::Refunded, "mp_900001", BOOKING_AMOUNT, &policy, NOW)
        .expect("Charge-back should apply");

    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
    assert!(escrow.refunded_at.is_some());
    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.payment_status, BookingPaymentStatus::Refunded);
}

#[test]
fn test_gateway_reversal_after_release_notifies_provider() {
    let mut conn = setup_test_db();
    let policy = EscrowPolicy::default();
    let (booking, payment) = create_paid_booking(&mut conn, NOW, 48, &policy);
    advance_booking(&mut conn, &booking.id, BookingStatus::Completed);
    run_in_transaction(&mut conn, |tx| escrow::release(tx, &booking.id)).expect("Release should succeed");

    report_status(&mut conn, &payment.id, PaymentStatus::Refunded, "mp_900001", BOOKING_AMOUNT, &policy, NOW)
        .expect("Charge-back should apply");

    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released, "Paid-out ledger stays as is");
    assert_eq!(queries::list_provider_payouts_for_booking(&conn, &booking.id).unwrap().len(), 1);

    let reversals: Vec<_> = queries::list_notifications_for_user(&conn, PROVIDER)
        .unwrap()
        .into_iter()
        .filter(|n| n.notification_type == NotificationType::PayoutReversed)
        .collect();
    assert_eq!(reversals.len(), 1);
    assert_eq!(reversals[0].related_id.as_deref(), Some(booking.id.as_str()));
}
