pub mod bookings;
pub mod payments;
pub mod webhooks;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/{id}", get(bookings::get_booking))
        .route("/bookings/{id}/status", post(bookings::update_booking_status))
        .route("/bookings/{id}/release", post(bookings::release_escrow))
        .route("/payments", post(payments::create_payment))
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/status", post(payments::update_payment_status))
        .route("/payments/{id}/refund", post(payments::refund_payment))
        .merge(webhooks::router())
}
