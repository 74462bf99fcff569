//! Payment, refund and escrow release endpoint tests

#[path = "../common/mod.rs"]
mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;

/// Confirmed booking created through the engine, 72 hours from now.
fn confirmed_booking(state: &AppState) -> Booking {
    let now = chrono::Utc::now().timestamp();
    let mut conn = state.db.get().unwrap();
    let booking = create_test_booking(&mut conn, now, 72);
    advance_booking(&mut conn, &booking.id, BookingStatus::Confirmed)
}

async fn set_status(state: &AppState, booking_id: &str, status: &str) -> StatusCode {
    let (code, _) = send_json(
        test_app(state.clone()),
        "POST",
        &format!("/bookings/{}/status", booking_id),
        Some(json!({"actor_id": PROVIDER, "status": status})),
    )
    .await;
    code
}

#[tokio::test]
async fn test_create_payment_opens_checkout() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let booking = confirmed_booking(&state);

    let (status, json) = send_json(
        test_app(state.clone()),
        "POST",
        "/payments",
        Some(json!({"booking_id": booking.id, "customer_id": CUSTOMER})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["preference_id"], "stub-pref-1");
    assert_eq!(json["payment"]["status"], "pending");
    assert_eq!(json["payment"]["amount_cents"], BOOKING_AMOUNT);
    assert_eq!(json["payment"]["preference_id"], "stub-pref-1");

    let checkouts = gateway.checkouts();
    assert_eq!(checkouts.len(), 1);
    assert_eq!(checkouts[0].booking_id, booking.id);
    assert_eq!(checkouts[0].notification_url, "http://localhost:3000/webhooks/mercadopago");

    let (status, _) = send_json(
        test_app(state),
        "POST",
        "/payments",
        Some(json!({"booking_id": booking.id, "customer_id": CUSTOMER})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "One payment per booking");
}

#[tokio::test]
async fn test_create_payment_guards() {
    let (_dir, state) = create_test_app_state(StubGateway::new());
    let booking = confirmed_booking(&state);

    let (status, _) = send_json(
        test_app(state.clone()),
        "POST",
        "/payments",
        Some(json!({"booking_id": booking.id, "customer_id": PROVIDER})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "Only the customer pays");

    let pending = {
        let mut conn = state.db.get().unwrap();
        create_test_booking(&mut conn, chrono::Utc::now().timestamp(), 96)
    };
    let (status, _) = send_json(
        test_app(state),
        "POST",
        "/payments",
        Some(json!({"booking_id": pending.id, "customer_id": CUSTOMER})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "Booking must be confirmed first");
}

#[tokio::test]
async fn test_checkout_failure_is_retryable() {
    let gateway = StubGateway::new();
    let (_dir, state) = create_test_app_state(gateway.clone());
    let booking = confirmed_booking(&state);
    let body = json!({"booking_id": booking.id, "customer_id": CUSTOMER});

    gateway.set_outage(Some("timeout"));
    let (status, _) = send_json(test_app(state.clone()), "POST", "/payments", Some(body.clone())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    gateway.set_outage(None);
    let (status, json) = send_json(test_app(state.clone()), "POST", "/payments", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);

    let conn = state.db.get().unwrap();
    assert_eq!(count_rows(&conn, "payments"), 1, "Retry reuses the pending payment");
    assert_eq!(json["payment"]["booking_id"], booking.id.as_str());
}

#[tokio::test]
async fn test_full_lifecycle_through_release() {
    let (_dir, state) = create_test_app_state(StubGateway::new());
    let booking = confirmed_booking(&state);

    let (_, created) = send_json(
        test_app(state.clone()),
        "POST",
        "/payments",
        Some(json!({"booking_id": booking.id, "customer_id": CUSTOMER})),
    )
    .await;
    let payment_id = created["payment"]["id"].as_str().unwrap().to_string();

    let (status, json) = send_json(
        test_app(state.clone()),
        "POST",
        &format!("/payments/{}/status", payment_id),
        Some(json!({"status": "approved", "external_id": "mp_1001", "amount_cents": BOOKING_AMOUNT})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["change"], "transitioned");
    assert_eq!(json["payment"]["status"], "approved");

    let release_uri = format!("/bookings/{}/release", booking.id);
    let (status, _) = send_json(test_app(state.clone()), "POST", &release_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT, "Release waits for completion");

    assert_eq!(set_status(&state, &booking.id, "in_progress").await, StatusCode::OK);
    assert_eq!(set_status(&state, &booking.id, "completed").await, StatusCode::OK);

    let (status, json) = send_json(test_app(state.clone()), "POST", &release_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["provider_amount_cents"], BOOKING_AMOUNT);

    let (status, _) = send_json(test_app(state.clone()), "POST", &release_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT, "Second release finds no held escrow");

    let (status, json) = send_json(test_app(state), "GET", &format!("/payments/{}", payment_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["escrow"]["status"], "released");
}

#[tokio::test]
async fn test_refund_endpoint() {
    let (_dir, state) = create_test_app_state(StubGateway::new());
    let booking = confirmed_booking(&state);
    let payment = {
        let mut conn = state.db.get().unwrap();
        let payment = create_test_payment(&mut conn, &booking);
        report_status(
            &mut conn,
            &payment.id,
            PaymentStatus::Approved,
            "mp_2002",
            BOOKING_AMOUNT,
            &state.escrow,
            chrono::Utc::now().timestamp(),
        )
        .unwrap();
        payment
    };
    let uri = format!("/payments/{}/refund", payment.id);

    let (status, _) = send_json(test_app(state.clone()), "POST", &uri, Some(json!({"actor_id": STRANGER}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send_json(
        test_app(state.clone()),
        "POST",
        &uri,
        Some(json!({"actor_id": CUSTOMER, "reason": "plans changed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["refund_percent"], 100);
    assert_eq!(json["booking_status"], "cancelled");

    let (status, json) = send_json(test_app(state), "GET", &format!("/bookings/{}", booking.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payment_status"], "refunded");
    assert_eq!(json["escrow"]["status"], "refunded");
}

#[tokio::test]
async fn test_refund_inside_cutoff_is_unprocessable() {
    let (_dir, state) = create_test_app_state(StubGateway::new());
    let now = chrono::Utc::now().timestamp();
    let (_, payment) = {
        let mut conn = state.db.get().unwrap();
        create_paid_booking(&mut conn, now, 6, &state.escrow)
    };

    let (status, json) = send_json(
        test_app(state),
        "POST",
        &format!("/payments/{}/refund", payment.id),
        Some(json!({"actor_id": CUSTOMER})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "Refund not allowed");
}
