//! Webhook ingestion tests against a stubbed gateway

#[path = "../common/mod.rs"]
mod common;

use bookpay::handlers::webhooks::common::{WebhookEnvelope, WebhookOutcome, ingest};
use bookpay::handlers::webhooks::mercadopago::{WebhookQuery, parse_notification};
use common::*;

fn delivery(webhook_id: &str, notification_type: &str, data_id: &str) -> WebhookEnvelope {
    let body = serde_json::json!({
        "id": webhook_id,
        "type": notification_type,
        "action": format!("{}.updated", notification_type),
        "data": { "id": data_id },
    });
    parse_notification(&WebhookQuery::default(), body.to_string().as_bytes()).expect("Delivery should parse")
}

/// Confirmed booking with a pending payment awaiting the gateway.
fn awaiting_payment(state: &AppState) -> (Booking, Payment) {
    let mut conn = state.db.get().unwrap();
    let booking = create_test_booking(&mut conn, NOW, 48);
    advance_booking(&mut conn, &booking.id, BookingStatus::Confirmed);
    let payment = create_test_payment(&mut conn, &booking);
    (booking, payment)
}

fn logs_for(state: &AppState, data_id: &str) -> Vec<WebhookLog> {
    let conn = state.db.get().unwrap();
    queries::list_webhook_logs_by_data_id(&conn, data_id).unwrap()
}

// ============ Happy path ============

#[tokio::test]
async fn test_approved_payment_holds_escrow() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);
    gateway.put_payment(gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT));

    let outcome = ingest(&state, delivery("wh_1", "payment", "42")).await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.external_id.as_deref(), Some("42"));
    let metadata = payment.gateway_metadata.expect("Gateway metadata should be stored");
    assert_eq!(metadata.payment_method_id.as_deref(), Some("pix"));

    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);
    assert_eq!(escrow.platform_fee_cents, 0);
    assert_eq!(escrow.provider_amount_cents, 10_000);

    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);

    let logs = queries::list_webhook_logs_by_webhook_id(&conn, "wh_1").unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, WebhookLogStatus::Processed);
    assert_eq!(logs[0].action.as_deref(), Some("payment.updated"));
}

#[tokio::test]
async fn test_merchant_order_uses_approved_attempt() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);
    gateway.put_order(GatewayMerchantOrder {
        id: "mo_77".into(),
        external_reference: Some(booking.id.clone()),
        preference_id: None,
        payments: vec![
            gateway_payment("41", &booking.id, "rejected", BOOKING_AMOUNT),
            gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT),
        ],
    });

    let outcome = ingest(&state, delivery("wh_mo", "merchant_order", "mo_77")).await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.external_id.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_merchant_order_resolved_by_preference_id() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (_, payment) = awaiting_payment(&state);
    {
        let conn = state.db.get().unwrap();
        queries::set_payment_preference_id(&conn, &payment.id, "123-pref").unwrap();
    }

    let mut attempt = gateway_payment("43", "ignored", "approved", BOOKING_AMOUNT);
    attempt.external_reference = None;
    gateway.put_order(GatewayMerchantOrder {
        id: "mo_88".into(),
        external_reference: None,
        preference_id: Some("123-pref".into()),
        payments: vec![attempt],
    });

    let outcome = ingest(&state, delivery("wh_pref", "merchant_order", "mo_88")).await;
    assert_eq!(outcome, WebhookOutcome::Processed);

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.external_id.as_deref(), Some("43"));
}

#[tokio::test]
async fn test_merchant_order_without_payments_is_skipped() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, _) = awaiting_payment(&state);
    gateway.put_order(GatewayMerchantOrder {
        id: "mo_empty".into(),
        external_reference: Some(booking.id.clone()),
        ..Default::default()
    });

    let outcome = ingest(&state, delivery("wh_mo", "merchant_order", "mo_empty")).await;
    assert!(matches!(outcome, WebhookOutcome::Skipped(_)));
    assert_eq!(logs_for(&state, "mo_empty")[0].status, WebhookLogStatus::Skipped);
}

// ============ Idempotency ============

#[tokio::test]
async fn test_repeated_delivery_processes_once() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);
    gateway.put_payment(gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT));

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(ingest(&state, delivery("wh_1", "payment", "42")).await);
    }

    assert_eq!(outcomes[0], WebhookOutcome::Processed);
    assert!(outcomes[1..].iter().all(|o| *o == WebhookOutcome::AlreadyProcessed));
    assert_eq!(gateway.fetch_count(), 1, "Duplicates should not reach the gateway");

    let logs = logs_for(&state, "42");
    assert_eq!(logs.len(), 5, "Every delivery is recorded");
    assert_eq!(logs.iter().filter(|l| l.status == WebhookLogStatus::Processed).count(), 1);
    assert_eq!(logs.iter().filter(|l| l.status == WebhookLogStatus::Skipped).count(), 4);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "escrow_records"), 1);
    let approvals = queries::list_notifications_for_user(&conn, CUSTOMER)
        .unwrap()
        .into_iter()
        .filter(|n| n.notification_type == NotificationType::PaymentApproved)
        .count();
    assert_eq!(approvals, 1);
    assert!(queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_process_once() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, _) = awaiting_payment(&state);
    gateway.put_payment(gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT));

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let state = state.clone();
            tokio::spawn(async move { ingest(&state, delivery(&format!("wh_{}", i), "payment", "42")).await })
        })
        .collect();

    let mut processed = 0;
    for task in tasks {
        match task.await.expect("Ingest task panicked") {
            WebhookOutcome::Processed => processed += 1,
            WebhookOutcome::AlreadyProcessed => {}
            other => panic!("Unexpected outcome {:?}", other),
        }
    }
    assert_eq!(processed, 1);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "escrow_records"), 1);
    assert_eq!(logs_for(&state, "42").len(), 6);
}

#[tokio::test]
async fn test_later_state_for_same_resource_is_applied() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);

    // Pix/boleto: first seen in process, which changes nothing locally
    gateway.put_payment(gateway_payment("77", &booking.id, "in_process", BOOKING_AMOUNT));
    assert_eq!(
        ingest(&state, delivery("wh_1", "payment", "77")).await,
        WebhookOutcome::Skipped("status unchanged".into())
    );

    gateway.put_payment(gateway_payment("77", &booking.id, "approved", BOOKING_AMOUNT));
    assert_eq!(ingest(&state, delivery("wh_2", "payment", "77")).await, WebhookOutcome::Processed);

    // Once applied, the approval is what later deliveries dedupe against
    assert_eq!(
        ingest(&state, delivery("wh_3", "payment", "77")).await,
        WebhookOutcome::AlreadyProcessed
    );

    let statuses: Vec<_> = logs_for(&state, "77").into_iter().map(|l| l.status).collect();
    assert_eq!(
        statuses,
        vec![WebhookLogStatus::Skipped, WebhookLogStatus::Processed, WebhookLogStatus::Skipped]
    );

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    assert_eq!(payment.external_id.as_deref(), Some("77"));
    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Held);
    let booking = queries::get_booking_by_id(&conn, &booking.id).unwrap().unwrap();
    assert_eq!(booking.payment_status, BookingPaymentStatus::Paid);
}

// ============ Failures ============

#[tokio::test]
async fn test_unhandled_type_is_skipped() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());

    let outcome = ingest(&state, delivery("wh_sub", "subscription_preapproval", "sub_1")).await;
    assert!(matches!(outcome, WebhookOutcome::Skipped(ref r) if r.contains("subscription_preapproval")));
    assert_eq!(gateway.fetch_count(), 0);

    let logs = logs_for(&state, "sub_1");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, WebhookLogStatus::Skipped);
}

#[tokio::test]
async fn test_gateway_outage_fails_then_retry_succeeds() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);
    gateway.put_payment(gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT));

    gateway.set_outage(Some("connection reset"));
    let outcome = ingest(&state, delivery("wh_1", "payment", "42")).await;
    assert!(matches!(outcome, WebhookOutcome::Failed(ref r) if r.contains("connection reset")));
    {
        let conn = state.db.get().unwrap();
        let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    gateway.set_outage(None);
    let outcome = ingest(&state, delivery("wh_1", "payment", "42")).await;
    assert_eq!(outcome, WebhookOutcome::Processed, "A failed delivery must not block its retry");

    let statuses: Vec<_> = logs_for(&state, "42").into_iter().map(|l| l.status).collect();
    assert_eq!(statuses, vec![WebhookLogStatus::Failed, WebhookLogStatus::Processed]);
}

#[tokio::test]
async fn test_underpaid_approval_fails_and_rolls_back() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);
    gateway.put_payment(gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT - 1));

    let outcome = ingest(&state, delivery("wh_1", "payment", "42")).await;
    assert!(matches!(outcome, WebhookOutcome::Failed(ref r) if r.contains("amount mismatch")));

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.external_id.is_none());
    assert_eq!(count_rows(&conn, "escrow_records"), 0);

    let logs = logs_for(&state, "42");
    assert_eq!(logs.len(), 1, "Only the failure row survives the rollback");
    assert_eq!(logs[0].status, WebhookLogStatus::Failed);
}

#[tokio::test]
async fn test_unknown_booking_reference_fails() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    gateway.put_payment(gateway_payment("42", "bp_bkg_doesnotexist", "approved", BOOKING_AMOUNT));

    let outcome = ingest(&state, delivery("wh_1", "payment", "42")).await;
    assert!(matches!(outcome, WebhookOutcome::Failed(_)));
    assert_eq!(logs_for(&state, "42")[0].status, WebhookLogStatus::Failed);
}

#[tokio::test]
async fn test_charge_back_after_approval() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let (booking, payment) = awaiting_payment(&state);

    gateway.put_payment(gateway_payment("42", &booking.id, "approved", BOOKING_AMOUNT));
    assert_eq!(ingest(&state, delivery("wh_1", "payment", "42")).await, WebhookOutcome::Processed);

    // A charge-back arrives as a merchant order update for the same payment
    gateway.put_order(GatewayMerchantOrder {
        id: "mo_9".into(),
        external_reference: Some(booking.id.clone()),
        preference_id: None,
        payments: vec![gateway_payment("42", &booking.id, "charged_back", BOOKING_AMOUNT)],
    });
    assert_eq!(
        ingest(&state, delivery("wh_2", "merchant_order", "mo_9")).await,
        WebhookOutcome::Processed
    );

    let conn = state.db.get().unwrap();
    let payment = queries::get_payment_by_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    let escrow = queries::get_escrow_by_payment_id(&conn, &payment.id).unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);
}
