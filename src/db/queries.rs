use chrono::Utc;
use rusqlite::{Connection, params, types::Value};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    BOOKING_COLS, ESCROW_COLS, NOTIFICATION_COLS, PAYMENT_COLS, PLATFORM_REVENUE_COLS,
    PROVIDER_PAYOUT_COLS, WEBHOOK_LOG_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Builder for guarded UPDATE statements.
///
/// Every update in the engine is a compare-and-set: the `WHERE` clause carries the
/// state the caller read, so a row that moved underneath it reports `false`
/// instead of being overwritten.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    guards: Vec<(&'static str, Value)>,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            guards: Vec::new(),
        }
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Only update if `column` currently equals `value`.
    fn when(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.guards.push((column, value.into()));
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        self.fields.push(("updated_at", now().into()));

        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut clauses = vec!["id = ?".to_string()];
        clauses.extend(self.guards.iter().map(|(col, _)| format!("{} = ?", col)));

        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        values.extend(self.guards.into_iter().map(|(_, v)| v));

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            sets.join(", "),
            clauses.join(" AND ")
        );
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Bookings ============

pub fn insert_booking(conn: &Connection, input: &CreateBooking) -> Result<Booking> {
    let id = EntityType::Booking.gen_id();
    let now = now();
    let date = input.scheduled_date.format(SLOT_DATE_FORMAT).to_string();
    let time = input.scheduled_time.format(SLOT_TIME_FORMAT).to_string();

    conn.execute(
        "INSERT INTO bookings (id, customer_id, provider_id, service_id, scheduled_date, scheduled_time,
            duration_minutes, address, latitude, longitude, notes, total_amount_cents, currency,
            status, payment_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
        params![
            &id,
            &input.customer_id,
            &input.provider_id,
            &input.service_id,
            &date,
            &time,
            input.duration_minutes,
            &input.address,
            input.latitude,
            input.longitude,
            &input.notes,
            input.total_amount_cents,
            &input.currency,
            BookingStatus::Pending.as_ref(),
            BookingPaymentStatus::Pending.as_ref(),
            now,
        ],
    )?;

    Ok(Booking {
        id,
        customer_id: input.customer_id.clone(),
        provider_id: input.provider_id.clone(),
        service_id: input.service_id.clone(),
        scheduled_date: input.scheduled_date,
        scheduled_time: input.scheduled_time,
        duration_minutes: input.duration_minutes,
        address: input.address.clone(),
        latitude: input.latitude,
        longitude: input.longitude,
        notes: input.notes.clone(),
        total_amount_cents: input.total_amount_cents,
        currency: input.currency.clone(),
        status: BookingStatus::Pending,
        payment_status: BookingPaymentStatus::Pending,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> Result<Option<Booking>> {
    query_one(
        conn,
        &format!("SELECT {} FROM bookings WHERE id = ?1", BOOKING_COLS),
        &[&id],
    )
}

/// The live booking (pending, confirmed or in progress) at a provider's slot, if any.
pub fn find_active_booking_for_slot(
    conn: &Connection,
    provider_id: &str,
    date: chrono::NaiveDate,
    time: chrono::NaiveTime,
) -> Result<Option<Booking>> {
    find_slot_holder(conn, provider_id, date, time, "status IN ('pending', 'confirmed', 'in_progress')")
}

/// Any non-cancelled booking at a provider's slot. Matches the partial unique index.
pub fn find_booking_holding_slot(
    conn: &Connection,
    provider_id: &str,
    date: chrono::NaiveDate,
    time: chrono::NaiveTime,
) -> Result<Option<Booking>> {
    find_slot_holder(conn, provider_id, date, time, "status != 'cancelled'")
}

fn find_slot_holder(
    conn: &Connection,
    provider_id: &str,
    date: chrono::NaiveDate,
    time: chrono::NaiveTime,
    status_filter: &str,
) -> Result<Option<Booking>> {
    let date = date.format(SLOT_DATE_FORMAT).to_string();
    let time = time.format(SLOT_TIME_FORMAT).to_string();
    query_one(
        conn,
        &format!(
            "SELECT {} FROM bookings
             WHERE provider_id = ?1 AND scheduled_date = ?2 AND scheduled_time = ?3 AND {}
             LIMIT 1",
            BOOKING_COLS, status_filter
        ),
        &[&provider_id, &date, &time],
    )
}

pub fn list_bookings_for_provider(conn: &Connection, provider_id: &str) -> Result<Vec<Booking>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM bookings WHERE provider_id = ?1 ORDER BY scheduled_date, scheduled_time",
            BOOKING_COLS
        ),
        &[&provider_id],
    )
}

/// Move a booking from `from` to `to`. Returns false if it was no longer in `from`.
pub fn update_booking_status(
    conn: &Connection,
    id: &str,
    from: BookingStatus,
    to: BookingStatus,
) -> Result<bool> {
    UpdateBuilder::new("bookings", id)
        .set("status", to.as_ref().to_string())
        .when("status", from.as_ref().to_string())
        .execute(conn)
}

pub fn set_booking_payment_status(
    conn: &Connection,
    id: &str,
    status: BookingPaymentStatus,
) -> Result<bool> {
    UpdateBuilder::new("bookings", id)
        .set("payment_status", status.as_ref().to_string())
        .execute(conn)
}

// ============ Payments ============

pub fn create_payment(
    conn: &Connection,
    booking: &Booking,
    payment_method: Option<&str>,
) -> Result<Payment> {
    let id = EntityType::Payment.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO payments (id, booking_id, customer_id, amount_cents, currency, payment_method,
            status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            &id,
            &booking.id,
            &booking.customer_id,
            booking.total_amount_cents,
            &booking.currency,
            payment_method,
            PaymentStatus::Pending.as_ref(),
            now,
        ],
    )?;

    Ok(Payment {
        id,
        booking_id: booking.id.clone(),
        customer_id: booking.customer_id.clone(),
        amount_cents: booking.total_amount_cents,
        currency: booking.currency.clone(),
        payment_method: payment_method.map(String::from),
        external_id: None,
        preference_id: None,
        status: PaymentStatus::Pending,
        gateway_metadata: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_payment_by_id(conn: &Connection, id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE id = ?1", PAYMENT_COLS),
        &[&id],
    )
}

pub fn get_payment_by_booking_id(conn: &Connection, booking_id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE booking_id = ?1", PAYMENT_COLS),
        &[&booking_id],
    )
}

pub fn get_payment_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE external_id = ?1", PAYMENT_COLS),
        &[&external_id],
    )
}

pub fn get_payment_by_preference_id(
    conn: &Connection,
    preference_id: &str,
) -> Result<Option<Payment>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payments WHERE preference_id = ?1", PAYMENT_COLS),
        &[&preference_id],
    )
}

pub fn set_payment_preference_id(conn: &Connection, id: &str, preference_id: &str) -> Result<bool> {
    UpdateBuilder::new("payments", id)
        .set("preference_id", preference_id.to_string())
        .execute(conn)
}

/// Bind the gateway transaction id. Only succeeds while the column is still NULL.
pub fn set_payment_external_id(conn: &Connection, id: &str, external_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payments SET external_id = ?1, updated_at = ?2 WHERE id = ?3 AND external_id IS NULL",
        params![external_id, now(), id],
    )?;
    Ok(affected > 0)
}

/// Compare-and-set the payment status, optionally replacing the gateway metadata.
pub fn update_payment_status(
    conn: &Connection,
    id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    metadata: Option<&GatewayMetadata>,
) -> Result<bool> {
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;
    UpdateBuilder::new("payments", id)
        .set("status", to.as_ref().to_string())
        .set_opt("gateway_metadata", metadata_json)
        .when("status", from.as_ref().to_string())
        .execute(conn)
}

pub fn update_payment_metadata(conn: &Connection, id: &str, metadata: &GatewayMetadata) -> Result<bool> {
    UpdateBuilder::new("payments", id)
        .set("gateway_metadata", serde_json::to_string(metadata)?)
        .execute(conn)
}

// ============ Escrow ============

/// Create the escrow hold for a payment, or refresh its split while it is still held.
///
/// A released or refunded escrow is left untouched.
pub fn upsert_escrow_hold(
    conn: &Connection,
    payment_id: &str,
    total_amount_cents: i64,
    platform_fee_cents: i64,
    provider_amount_cents: i64,
    hold_until: i64,
) -> Result<Option<EscrowRecord>> {
    let now = now();
    conn.execute(
        "INSERT INTO escrow_records (id, payment_id, total_amount_cents, platform_fee_cents,
            provider_amount_cents, status, hold_until, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'held', ?6, ?7, ?7)
         ON CONFLICT(payment_id) DO UPDATE SET
            total_amount_cents = excluded.total_amount_cents,
            platform_fee_cents = excluded.platform_fee_cents,
            provider_amount_cents = excluded.provider_amount_cents,
            hold_until = excluded.hold_until,
            updated_at = excluded.updated_at
         WHERE escrow_records.status = 'held'",
        params![
            EntityType::EscrowRecord.gen_id(),
            payment_id,
            total_amount_cents,
            platform_fee_cents,
            provider_amount_cents,
            hold_until,
            now,
        ],
    )?;
    get_escrow_by_payment_id(conn, payment_id)
}

pub fn get_escrow_by_id(conn: &Connection, id: &str) -> Result<Option<EscrowRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM escrow_records WHERE id = ?1", ESCROW_COLS),
        &[&id],
    )
}

pub fn get_escrow_by_payment_id(conn: &Connection, payment_id: &str) -> Result<Option<EscrowRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM escrow_records WHERE payment_id = ?1", ESCROW_COLS),
        &[&payment_id],
    )
}

/// Escrow records whose safety hold has lapsed while still held.
pub fn list_overdue_escrows(conn: &Connection, as_of: i64) -> Result<Vec<EscrowRecord>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM escrow_records WHERE status = 'held' AND hold_until < ?1 ORDER BY hold_until",
            ESCROW_COLS
        ),
        &[&as_of],
    )
}

/// Atomically claim a held escrow for release. Returns false if it is no longer held.
pub fn mark_escrow_released(conn: &Connection, id: &str) -> Result<bool> {
    let now = now();
    UpdateBuilder::new("escrow_records", id)
        .set("status", EscrowStatus::Released.as_ref().to_string())
        .set("released_at", now)
        .when("status", EscrowStatus::Held.as_ref().to_string())
        .execute(conn)
}

/// Atomically claim a held escrow for refund. Returns false if it is no longer held.
pub fn mark_escrow_refunded(conn: &Connection, id: &str) -> Result<bool> {
    let now = now();
    UpdateBuilder::new("escrow_records", id)
        .set("status", EscrowStatus::Refunded.as_ref().to_string())
        .set("refunded_at", now)
        .when("status", EscrowStatus::Held.as_ref().to_string())
        .execute(conn)
}

pub fn create_provider_payout(
    conn: &Connection,
    provider_id: &str,
    booking_id: &str,
    escrow_id: &str,
    amount_cents: i64,
    currency: &str,
) -> Result<ProviderPayout> {
    let payout = ProviderPayout {
        id: EntityType::ProviderPayout.gen_id(),
        provider_id: provider_id.to_string(),
        booking_id: booking_id.to_string(),
        escrow_id: escrow_id.to_string(),
        amount_cents,
        currency: currency.to_string(),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO provider_payouts (id, provider_id, booking_id, escrow_id, amount_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &payout.id,
            &payout.provider_id,
            &payout.booking_id,
            &payout.escrow_id,
            payout.amount_cents,
            &payout.currency,
            payout.created_at,
        ],
    )?;
    Ok(payout)
}

pub fn create_platform_revenue(
    conn: &Connection,
    booking_id: &str,
    escrow_id: &str,
    amount_cents: i64,
    currency: &str,
) -> Result<PlatformRevenue> {
    let revenue = PlatformRevenue {
        id: EntityType::PlatformRevenue.gen_id(),
        booking_id: booking_id.to_string(),
        escrow_id: escrow_id.to_string(),
        amount_cents,
        currency: currency.to_string(),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO platform_revenue (id, booking_id, escrow_id, amount_cents, currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &revenue.id,
            &revenue.booking_id,
            &revenue.escrow_id,
            revenue.amount_cents,
            &revenue.currency,
            revenue.created_at,
        ],
    )?;
    Ok(revenue)
}

pub fn list_provider_payouts_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> Result<Vec<ProviderPayout>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM provider_payouts WHERE booking_id = ?1 ORDER BY created_at",
            PROVIDER_PAYOUT_COLS
        ),
        &[&booking_id],
    )
}

pub fn list_platform_revenue_for_booking(
    conn: &Connection,
    booking_id: &str,
) -> Result<Vec<PlatformRevenue>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM platform_revenue WHERE booking_id = ?1 ORDER BY created_at",
            PLATFORM_REVENUE_COLS
        ),
        &[&booking_id],
    )
}

// ============ Webhook Logs ============

/// Append a delivery record. Rows are never updated or deleted.
pub fn create_webhook_log(conn: &Connection, input: &CreateWebhookLog) -> Result<WebhookLog> {
    let log = WebhookLog {
        id: EntityType::WebhookLog.gen_id(),
        webhook_id: input.webhook_id.clone(),
        notification_type: input.notification_type.clone(),
        action: input.action.clone(),
        data_id: input.data_id.clone(),
        payload: input.payload.clone(),
        result: input.result.clone(),
        status: input.status,
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO webhook_logs (id, webhook_id, notification_type, action, data_id, payload, result, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &log.id,
            &log.webhook_id,
            &log.notification_type,
            &log.action,
            &log.data_id,
            serde_json::to_string(&log.payload)?,
            &log.result,
            log.status.as_ref(),
            log.created_at,
        ],
    )?;
    Ok(log)
}

/// Whether a delivery for this (data_id, type) pair has already been processed.
///
/// Only `processed` rows count: failed deliveries must be retryable and skipped
/// ones never changed anything.
pub fn has_processed_webhook(conn: &Connection, data_id: &str, notification_type: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM webhook_logs WHERE data_id = ?1 AND notification_type = ?2 AND status = 'processed')",
        params![data_id, notification_type],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn list_webhook_logs_by_webhook_id(conn: &Connection, webhook_id: &str) -> Result<Vec<WebhookLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_logs WHERE webhook_id = ?1 ORDER BY created_at, rowid",
            WEBHOOK_LOG_COLS
        ),
        &[&webhook_id],
    )
}

pub fn list_webhook_logs_by_data_id(conn: &Connection, data_id: &str) -> Result<Vec<WebhookLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM webhook_logs WHERE data_id = ?1 ORDER BY created_at, rowid",
            WEBHOOK_LOG_COLS
        ),
        &[&data_id],
    )
}

// ============ Notifications ============

pub fn create_notification(conn: &Connection, input: &CreateNotification) -> Result<Notification> {
    let notification = Notification {
        id: EntityType::Notification.gen_id(),
        user_id: input.user_id.clone(),
        title: input.title.clone(),
        message: input.message.clone(),
        notification_type: input.notification_type,
        related_id: input.related_id.clone(),
        created_at: now(),
    };
    conn.execute(
        "INSERT INTO notifications (id, user_id, title, message, notification_type, related_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &notification.id,
            &notification.user_id,
            &notification.title,
            &notification.message,
            notification.notification_type.as_ref(),
            &notification.related_id,
            notification.created_at,
        ],
    )?;
    Ok(notification)
}

pub fn list_notifications_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Notification>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at, rowid",
            NOTIFICATION_COLS
        ),
        &[&user_id],
    )
}
