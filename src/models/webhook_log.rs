use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WebhookLogStatus {
    Processed,
    Failed,
    /// Unhandled type or duplicate delivery. Not an error.
    Skipped,
}

/// One delivery attempt. Rows are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    /// Gateway notification id, or a generated one when the gateway sent none.
    pub webhook_id: String,
    pub notification_type: String,
    pub action: Option<String>,
    pub data_id: String,
    pub payload: serde_json::Value,
    pub result: Option<String>,
    pub status: WebhookLogStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateWebhookLog {
    pub webhook_id: String,
    pub notification_type: String,
    pub action: Option<String>,
    pub data_id: String,
    pub payload: serde_json::Value,
    pub result: Option<String>,
    pub status: WebhookLogStatus,
}
