mod mercadopago;

pub use mercadopago::*;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{GatewayMetadata, PaymentStatus};
use crate::payment_state::StatusReport;

/// Outbound payment gateway operations.
///
/// Injected into [`crate::db::AppState`] so handlers never reach for global client
/// configuration, and tests can substitute a stub.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway name for logging (e.g., "mercadopago").
    fn name(&self) -> &'static str;

    /// Fetch the authoritative state of a gateway payment.
    async fn get_payment(&self, id: &str) -> Result<GatewayPayment>;

    /// Fetch a merchant order with the payments made against it.
    async fn get_merchant_order(&self, id: &str) -> Result<GatewayMerchantOrder>;

    /// Create a hosted checkout for a local payment.
    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
}

/// A gateway payment as reported by the gateway. Amounts are in cents.
#[derive(Debug, Clone, Default)]
pub struct GatewayPayment {
    pub id: String,
    /// Raw gateway status string.
    pub status: String,
    pub status_detail: Option<String>,
    /// Set at checkout to the booking id.
    pub external_reference: Option<String>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub payment_method_id: Option<String>,
    pub installments: Option<i32>,
    pub net_received_cents: Option<i64>,
    pub fee_cents: Option<i64>,
}

impl GatewayPayment {
    pub fn local_status(&self) -> PaymentStatus {
        PaymentStatus::from_gateway_status(&self.status)
    }

    pub fn metadata(&self) -> GatewayMetadata {
        GatewayMetadata {
            status_detail: self.status_detail.clone(),
            installments: self.installments,
            net_received_cents: self.net_received_cents,
            gateway_fee_cents: self.fee_cents,
            payment_method_id: self.payment_method_id.clone(),
        }
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            status: self.local_status(),
            external_id: Some(self.id.clone()),
            amount_cents: Some(self.amount_cents),
            metadata: Some(self.metadata()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayMerchantOrder {
    pub id: String,
    pub external_reference: Option<String>,
    pub preference_id: Option<String>,
    pub payments: Vec<GatewayPayment>,
}

impl GatewayMerchantOrder {
    /// The payment that best describes the order's outcome.
    ///
    /// Orders can carry several attempts (a rejected card, then an approved one).
    /// Approval wins, then reversals, then anything still in flight, then failures.
    pub fn decisive_payment(&self) -> Option<&GatewayPayment> {
        self.payments.iter().max_by_key(|p| decisiveness(p.local_status()))
    }
}

fn decisiveness(status: PaymentStatus) -> u8 {
    match status {
        PaymentStatus::Approved => 4,
        PaymentStatus::Refunded => 3,
        PaymentStatus::Pending => 2,
        PaymentStatus::Rejected | PaymentStatus::Cancelled => 1,
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub payment_id: String,
    pub booking_id: String,
    pub title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payer_id: String,
    pub notification_url: String,
    pub success_url: String,
    pub failure_url: String,
    pub pending_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutSession {
    pub preference_id: String,
    pub checkout_url: String,
}
