use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// `Released` and `Refunded` are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub id: String,
    pub payment_id: String,
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub provider_amount_cents: i64,
    pub status: EscrowStatus,
    /// Safety bound on how long funds may sit in escrow. Monitoring only.
    pub hold_until: i64,
    pub released_at: Option<i64>,
    pub refunded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Accounting row written when escrow is released to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPayout {
    pub id: String,
    pub provider_id: String,
    pub booking_id: String,
    pub escrow_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: i64,
}

/// Accounting row for the platform's cut of a released escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRevenue {
    pub id: String,
    pub booking_id: String,
    pub escrow_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: i64,
}

/// Result of releasing escrow for a booking.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    pub escrow_id: String,
    pub booking_id: String,
    pub payout_id: String,
    pub revenue_id: String,
    pub total_amount_cents: i64,
    pub platform_fee_cents: i64,
    pub provider_amount_cents: i64,
}
