//! Row mapping trait and helpers for reducing boilerplate in queries.

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// A corrupt status value surfaces as a query error instead of a panic.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_date(row: &Row, col: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(col)?;
    parse_slot_date(&raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(col, "scheduled_date".into(), rusqlite::types::Type::Text)
    })
}

fn parse_time(row: &Row, col: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(col)?;
    parse_slot_time(&raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(col, "scheduled_time".into(), rusqlite::types::Type::Text)
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const BOOKING_COLS: &str = "id, customer_id, provider_id, service_id, scheduled_date, scheduled_time, duration_minutes, address, latitude, longitude, notes, total_amount_cents, currency, status, payment_status, created_at, updated_at";

pub const PAYMENT_COLS: &str = "id, booking_id, customer_id, amount_cents, currency, payment_method, external_id, preference_id, status, gateway_metadata, created_at, updated_at";

pub const ESCROW_COLS: &str = "id, payment_id, total_amount_cents, platform_fee_cents, provider_amount_cents, status, hold_until, released_at, refunded_at, created_at, updated_at";

pub const WEBHOOK_LOG_COLS: &str =
    "id, webhook_id, notification_type, action, data_id, payload, result, status, created_at";

pub const PROVIDER_PAYOUT_COLS: &str =
    "id, provider_id, booking_id, escrow_id, amount_cents, currency, created_at";

pub const PLATFORM_REVENUE_COLS: &str = "id, booking_id, escrow_id, amount_cents, currency, created_at";

pub const NOTIFICATION_COLS: &str =
    "id, user_id, title, message, notification_type, related_id, created_at";

// ============ FromRow Implementations ============

impl FromRow for Booking {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Booking {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            provider_id: row.get(2)?,
            service_id: row.get(3)?,
            scheduled_date: parse_date(row, 4)?,
            scheduled_time: parse_time(row, 5)?,
            duration_minutes: row.get(6)?,
            address: row.get(7)?,
            latitude: row.get(8)?,
            longitude: row.get(9)?,
            notes: row.get(10)?,
            total_amount_cents: row.get(11)?,
            currency: row.get(12)?,
            status: parse_enum(row, 13, "status")?,
            payment_status: parse_enum(row, 14, "payment_status")?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl FromRow for Payment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Payment {
            id: row.get(0)?,
            booking_id: row.get(1)?,
            customer_id: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            payment_method: row.get(5)?,
            external_id: row.get(6)?,
            preference_id: row.get(7)?,
            status: parse_enum(row, 8, "status")?,
            gateway_metadata: parse_json(row, 9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl FromRow for EscrowRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(EscrowRecord {
            id: row.get(0)?,
            payment_id: row.get(1)?,
            total_amount_cents: row.get(2)?,
            platform_fee_cents: row.get(3)?,
            provider_amount_cents: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            hold_until: row.get(6)?,
            released_at: row.get(7)?,
            refunded_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl FromRow for WebhookLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookLog {
            id: row.get(0)?,
            webhook_id: row.get(1)?,
            notification_type: row.get(2)?,
            action: row.get(3)?,
            data_id: row.get(4)?,
            payload: parse_json(row, 5)?.unwrap_or(serde_json::Value::Null),
            result: row.get(6)?,
            status: parse_enum(row, 7, "status")?,
            created_at: row.get(8)?,
        })
    }
}

impl FromRow for ProviderPayout {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProviderPayout {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            booking_id: row.get(2)?,
            escrow_id: row.get(3)?,
            amount_cents: row.get(4)?,
            currency: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for PlatformRevenue {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PlatformRevenue {
            id: row.get(0)?,
            booking_id: row.get(1)?,
            escrow_id: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for Notification {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            message: row.get(3)?,
            notification_type: parse_enum(row, 4, "notification_type")?,
            related_id: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}
