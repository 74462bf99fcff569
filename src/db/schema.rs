use rusqlite::Connection;

/// Initialize the engine's schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Bookings (owned by scheduling; payment_status is written only by this engine)
        CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            service_id TEXT NOT NULL,
            scheduled_date TEXT NOT NULL,   -- YYYY-MM-DD (UTC)
            scheduled_time TEXT NOT NULL,   -- HH:MM (UTC)
            duration_minutes INTEGER NOT NULL CHECK (duration_minutes > 0),
            address TEXT,
            latitude REAL,
            longitude REAL,
            notes TEXT,
            total_amount_cents INTEGER NOT NULL CHECK (total_amount_cents > 0),
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'confirmed', 'in_progress', 'completed', 'cancelled')),
            payment_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (payment_status IN ('pending', 'paid', 'failed', 'refunded', 'completed')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bookings_customer ON bookings(customer_id);
        CREATE INDEX IF NOT EXISTS idx_bookings_provider ON bookings(provider_id);
        -- Backstop for the slot lock: one live booking per slot
        CREATE UNIQUE INDEX IF NOT EXISTS idx_bookings_live_slot
            ON bookings(provider_id, scheduled_date, scheduled_time) WHERE status != 'cancelled';

        -- Payments (one per booking)
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            booking_id TEXT NOT NULL UNIQUE REFERENCES bookings(id),
            customer_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            currency TEXT NOT NULL,
            payment_method TEXT,
            external_id TEXT UNIQUE,
            preference_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'approved', 'rejected', 'cancelled', 'refunded')),
            gateway_metadata TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_external ON payments(external_id);

        CREATE TRIGGER IF NOT EXISTS trg_payments_external_id_immutable
        BEFORE UPDATE OF external_id ON payments
        WHEN OLD.external_id IS NOT NULL AND NEW.external_id IS NOT OLD.external_id
        BEGIN
            SELECT RAISE(ABORT, 'payments.external_id is immutable once set');
        END;

        -- Escrow (one per approved payment)
        CREATE TABLE IF NOT EXISTS escrow_records (
            id TEXT PRIMARY KEY,
            payment_id TEXT NOT NULL UNIQUE REFERENCES payments(id),
            total_amount_cents INTEGER NOT NULL,
            platform_fee_cents INTEGER NOT NULL CHECK (platform_fee_cents >= 0),
            provider_amount_cents INTEGER NOT NULL CHECK (provider_amount_cents >= 0),
            status TEXT NOT NULL DEFAULT 'held' CHECK (status IN ('held', 'released', 'refunded')),
            hold_until INTEGER NOT NULL,
            released_at INTEGER,
            refunded_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (platform_fee_cents + provider_amount_cents = total_amount_cents)
        );
        CREATE INDEX IF NOT EXISTS idx_escrow_status ON escrow_records(status);

        -- Webhook deliveries: idempotency oracle and audit trail (append-only)
        CREATE TABLE IF NOT EXISTS webhook_logs (
            id TEXT PRIMARY KEY,
            webhook_id TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            action TEXT,
            data_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            result TEXT,
            status TEXT NOT NULL CHECK (status IN ('processed', 'failed', 'skipped')),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_dedupe ON webhook_logs(data_id, notification_type, status);
        CREATE INDEX IF NOT EXISTS idx_webhook_logs_webhook ON webhook_logs(webhook_id);

        CREATE TRIGGER IF NOT EXISTS trg_webhook_logs_no_update
        BEFORE UPDATE ON webhook_logs
        BEGIN
            SELECT RAISE(ABORT, 'webhook_logs is append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS trg_webhook_logs_no_delete
        BEFORE DELETE ON webhook_logs
        BEGIN
            SELECT RAISE(ABORT, 'webhook_logs is append-only');
        END;

        -- Accounting rows written on escrow release (one each per escrow)
        CREATE TABLE IF NOT EXISTS provider_payouts (
            id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL,
            booking_id TEXT NOT NULL REFERENCES bookings(id),
            escrow_id TEXT NOT NULL UNIQUE REFERENCES escrow_records(id),
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provider_payouts_provider ON provider_payouts(provider_id);

        CREATE TABLE IF NOT EXISTS platform_revenue (
            id TEXT PRIMARY KEY,
            booking_id TEXT NOT NULL REFERENCES bookings(id),
            escrow_id TEXT NOT NULL UNIQUE REFERENCES escrow_records(id),
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Notification outbox (delivery is someone else's job)
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            notification_type TEXT NOT NULL,
            related_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id);
        "#,
    )
}
