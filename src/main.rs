use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::{Days, Utc};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookpay::config::Config;
use bookpay::db::{AppState, create_pool, init_db, queries, run_in_pooled_transaction};
use bookpay::handlers;
use bookpay::models::{BookingStatus, CreateBooking, parse_slot_time};
use bookpay::payments::MercadoPagoClient;

#[derive(Parser, Debug)]
#[command(name = "bookpay")]
#[command(about = "Payment escrow and webhook reconciliation for a services marketplace")]
struct Cli {
    /// Seed the database with dev data (a confirmed booking ready for checkout)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data for testing.
/// Only runs in dev mode and when the dev provider has no bookings yet.
fn seed_dev_data(state: &AppState) {
    const DEV_PROVIDER: &str = "dev_provider";
    const DEV_CUSTOMER: &str = "dev_customer";

    let conn = state.db.get().expect("Failed to get db connection for seeding");
    let existing = queries::list_bookings_for_provider(&conn, DEV_PROVIDER).expect("Failed to list bookings");
    if !existing.is_empty() {
        tracing::info!("Database already has data, skipping seed");
        return;
    }
    drop(conn);

    let scheduled_date = Utc::now()
        .date_naive()
        .checked_add_days(Days::new(7))
        .expect("Date out of range");
    let input = CreateBooking {
        customer_id: DEV_CUSTOMER.to_string(),
        provider_id: DEV_PROVIDER.to_string(),
        service_id: "dev_cleaning".to_string(),
        scheduled_date,
        scheduled_time: parse_slot_time("14:00").expect("Valid time literal"),
        duration_minutes: 120,
        address: Some("Rua Augusta 1000, São Paulo".to_string()),
        latitude: Some(-23.5558),
        longitude: Some(-46.6622),
        notes: None,
        total_amount_cents: 10_000,
        currency: "brl".to_string(),
    };

    let now = queries::now();
    let booking = run_in_pooled_transaction(&state.db, |tx| {
        let booking = bookpay::bookings::create_booking(tx, &input, state.booking_horizon_months, now)?;
        bookpay::bookings::transition_booking(tx, &booking.id, DEV_PROVIDER, BookingStatus::Confirmed)
    })
    .expect("Failed to seed dev booking");

    tracing::info!("============================================");
    tracing::info!("SEEDED DEV DATA");
    tracing::info!("Booking: {} ({} at {} UTC)", booking.id, booking.scheduled_date, booking.scheduled_time);
    tracing::info!("Customer: {}  Provider: {}", DEV_CUSTOMER, DEV_PROVIDER);
    tracing::info!("============================================");
}

/// Periodically report escrow holds that outlived their hold window.
/// Monitoring only: nothing is released or refunded automatically.
fn spawn_escrow_monitor(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::list_overdue_escrows(&conn, queries::now()) {
                    Ok(overdue) => {
                        for escrow in &overdue {
                            tracing::warn!(
                                "Escrow {} (payment {}) still held past hold_until {}",
                                escrow.id,
                                escrow.payment_id,
                                escrow.hold_until
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to list overdue escrows: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for escrow monitor: {}", e);
                }
            }
        }
    });

    tracing::info!("Escrow monitor started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    if config.gateway.access_token.is_empty() {
        tracing::warn!("MP_ACCESS_TOKEN is not set, gateway calls will be rejected");
    }
    if config.gateway.webhook_secret.is_none() {
        tracing::warn!("MP_WEBHOOK_SECRET is not set, webhook signatures will not be verified");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let gateway = MercadoPagoClient::new(&config.gateway).expect("Failed to create Mercado Pago client");

    let state = AppState {
        db: db_pool,
        gateway: Arc::new(gateway),
        escrow: config.escrow,
        refunds: config.refunds,
        booking_horizon_months: config.booking_horizon_months,
        webhook_secret: config.gateway.webhook_secret.clone(),
        base_url: config.base_url.clone(),
    };

    tracing::info!(
        "Platform fee rate {}, escrow hold {} days, refund cutoff {}h",
        config.escrow.fee_rate,
        config.escrow.hold_days,
        config.refunds.cutoff_hours
    );

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BOOKPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_escrow_monitor(state.clone());

    let app = Router::new()
        .merge(handlers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("bookpay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
