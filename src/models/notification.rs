use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    PaymentApproved,
    PaymentFailed,
    PaymentRefunded,
    EscrowReleased,
    /// Gateway reversed a payment whose escrow was already paid out.
    PayoutReversed,
    BookingCreated,
    BookingStatusChanged,
}

/// Outbox row picked up by the notification delivery service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub related_id: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub related_id: Option<String>,
}
