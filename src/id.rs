//! Prefixed ids for bookpay rows: `bp_{entity}_{uuid_simple}`.
//!
//! The `bp_` brand keeps our ids apart from gateway identifiers (Mercado Pago
//! payment ids are numeric, preference ids are `{collector}-{uuid}`), so a
//! gateway id pasted into one of our routes is rejected before any lookup.

use strum::{EnumIter, IntoEnumIterator};
use uuid::Uuid;

const UUID_HEX_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum EntityType {
    Booking,
    Payment,
    EscrowRecord,
    WebhookLog,
    ProviderPayout,
    PlatformRevenue,
    Notification,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Booking => "bp_bkg",
            Self::Payment => "bp_pay",
            Self::EscrowRecord => "bp_esc",
            Self::WebhookLog => "bp_whl",
            Self::ProviderPayout => "bp_pout",
            Self::PlatformRevenue => "bp_rev",
            Self::Notification => "bp_ntf",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }

    /// Which entity a well-formed id belongs to.
    pub fn of(id: &str) -> Option<Self> {
        Self::iter().find(|entity| {
            id.strip_prefix(entity.prefix())
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|hex| hex.len() == UUID_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit()))
        })
    }
}

pub fn is_valid_prefixed_id(s: &str) -> bool {
    EntityType::of(s).is_some()
}
