use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Service lifecycle of a booking. `Completed` and `Cancelled` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

/// Payment-side projection stored on the booking row.
/// Only the payment engine writes this column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BookingPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    /// Escrow released to the provider.
    Completed,
}

/// Which side of a booking an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    Customer,
    Provider,
}

impl BookingStatus {
    /// Statuses that occupy a slot for the booking lock.
    pub const ACTIVE: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
    ];

    /// Roles allowed to move a booking from `self` to `to`. Empty means never.
    pub fn allowed_roles(self, to: BookingStatus) -> &'static [UserRole] {
        use BookingStatus::*;
        use UserRole::*;

        match (self, to) {
            (Pending, Confirmed) => &[Provider],
            (Pending, Cancelled) | (Confirmed, Cancelled) => &[Customer, Provider],
            (Confirmed, InProgress) => &[Provider],
            (InProgress, Completed) => &[Provider],
            // A customer cannot cancel work that is already underway
            (InProgress, Cancelled) => &[Provider],
            _ => &[],
        }
    }

    pub fn can_transition(self, to: BookingStatus, role: UserRole) -> bool {
        self.allowed_roles(to).contains(&role)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub service_id: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub duration_minutes: i32,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub notes: Option<String>,
    pub total_amount_cents: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub payment_status: BookingPaymentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Booking {
    /// Scheduled start as a unix timestamp. Slots are stored in UTC.
    pub fn scheduled_at(&self) -> i64 {
        scheduled_timestamp(self.scheduled_date, self.scheduled_time)
    }

    /// Role of `actor_id` on this booking, if they take part in it at all.
    pub fn role_of(&self, actor_id: &str) -> Option<UserRole> {
        if actor_id == self.provider_id {
            Some(UserRole::Provider)
        } else if actor_id == self.customer_id {
            Some(UserRole::Customer)
        } else {
            None
        }
    }
}

pub fn scheduled_timestamp(date: NaiveDate, time: NaiveTime) -> i64 {
    date.and_time(time).and_utc().timestamp()
}

/// Booking request coming from the scheduling workflow, already parsed.
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub customer_id: String,
    pub provider_id: String,
    pub service_id: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub duration_minutes: i32,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub notes: Option<String>,
    pub total_amount_cents: i64,
    pub currency: String,
}

/// Slot times are stored at minute granularity.
pub const SLOT_TIME_FORMAT: &str = "%H:%M";
pub const SLOT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse `HH:MM` (seconds tolerated and dropped).
pub fn parse_slot_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, SLOT_TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
        .and_then(|t| NaiveTime::from_hms_opt(t.hour(), t.minute(), 0))
}

pub fn parse_slot_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, SLOT_DATE_FORMAT).ok()
}
