use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use super::BookingPaymentStatus;

/// Local payment status. Transitions:
///
/// ```text
/// pending ──► approved ──► refunded
///    │
///    ├──► rejected
///    └──► cancelled
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn can_transition_to(self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Rejected | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    /// Map a gateway-reported status string onto a local status.
    ///
    /// Unknown values fall back to `Pending`: approval has to be stated explicitly.
    pub fn from_gateway_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "approved" => PaymentStatus::Approved,
            "pending" | "in_process" | "authorized" | "in_mediation" => PaymentStatus::Pending,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" => PaymentStatus::Cancelled,
            "refunded" | "charged_back" => PaymentStatus::Refunded,
            other => {
                tracing::warn!("Unrecognized gateway payment status '{}', treating as pending", other);
                PaymentStatus::Pending
            }
        }
    }

    /// The booking's `payment_status` that mirrors this payment status.
    pub fn booking_projection(self) -> BookingPaymentStatus {
        match self {
            PaymentStatus::Pending => BookingPaymentStatus::Pending,
            PaymentStatus::Approved => BookingPaymentStatus::Paid,
            PaymentStatus::Rejected | PaymentStatus::Cancelled => BookingPaymentStatus::Failed,
            PaymentStatus::Refunded => BookingPaymentStatus::Refunded,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub booking_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method: Option<String>,
    /// Gateway transaction id. Written once, never changed.
    pub external_id: Option<String>,
    /// Gateway checkout (preference) id created at initiation.
    pub preference_id: Option<String>,
    pub status: PaymentStatus,
    pub gateway_metadata: Option<GatewayMetadata>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fee breakdown and settlement details reported by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayMetadata {
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub installments: Option<i32>,
    #[serde(default)]
    pub net_received_cents: Option<i64>,
    #[serde(default)]
    pub gateway_fee_cents: Option<i64>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

/// Payment initiation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePayment {
    pub booking_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub payment_method: Option<String>,
}
