//! bookpay - payment escrow and webhook reconciliation for a services marketplace
//!
//! Turns payment gateway notifications into local state exactly once, holds
//! customer funds in escrow until the service is delivered, and keeps bookings
//! consistent with their payments under concurrent access.

pub mod bookings;
pub mod config;
pub mod db;
pub mod error;
pub mod escrow;
pub mod extractors;
pub mod handlers;
pub mod id;
pub mod models;
pub mod notifications;
pub mod payment_state;
pub mod payments;
pub mod refunds;
