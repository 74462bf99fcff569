use std::env;
use std::time::Duration;

use crate::escrow::EscrowPolicy;
use crate::refunds::RefundPolicy;

/// Hard upper bound on the platform fee rate; a rate of 1.0 would leave nothing for providers.
const MAX_FEE_RATE: f64 = 0.99;
/// Escrow holds longer than ten years are treated as misconfiguration.
const MAX_HOLD_DAYS: i64 = 3_650;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    pub escrow: EscrowPolicy,
    pub refunds: RefundPolicy,
    /// How far ahead bookings may be scheduled.
    pub booking_horizon_months: u32,
    pub gateway: GatewayConfig,
}

/// Mercado Pago credentials and client settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub access_token: String,
    /// When set, inbound webhooks must carry a valid `x-signature`.
    pub webhook_secret: Option<String>,
    pub timeout: Duration,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Ignoring unparseable {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn checked_hold_days(days: i64) -> i64 {
    if (0..=MAX_HOLD_DAYS).contains(&days) {
        return days;
    }
    let fallback = EscrowPolicy::default().hold_days;
    tracing::warn!(
        "ESCROW_HOLD_DAYS={} is outside [0, {}], falling back to {}",
        days,
        MAX_HOLD_DAYS,
        fallback
    );
    fallback
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BOOKPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        let base_url = env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let mut fee_rate: f64 = env_parse("PLATFORM_FEE_RATE", 0.0);
        if !(0.0..=MAX_FEE_RATE).contains(&fee_rate) {
            tracing::warn!(
                "PLATFORM_FEE_RATE={} is outside [0, {}], falling back to 0",
                fee_rate,
                MAX_FEE_RATE
            );
            fee_rate = 0.0;
        }

        let escrow = EscrowPolicy {
            fee_rate,
            hold_days: checked_hold_days(env_parse("ESCROW_HOLD_DAYS", EscrowPolicy::default().hold_days)),
        };

        let defaults = RefundPolicy::default();
        let refunds = RefundPolicy {
            cutoff_hours: env_parse("REFUND_CUTOFF_HOURS", defaults.cutoff_hours),
            full_refund_hours: env_parse("FULL_REFUND_HOURS", defaults.full_refund_hours),
            partial_refund_percent: env_parse("PARTIAL_REFUND_PERCENT", defaults.partial_refund_percent),
        };

        let gateway = GatewayConfig {
            api_base_url: env::var("MP_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            access_token: env::var("MP_ACCESS_TOKEN").unwrap_or_default(),
            webhook_secret: env::var("MP_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(env_parse("GATEWAY_TIMEOUT_SECS", 10)),
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "bookpay.db".to_string()),
            base_url,
            dev_mode,
            escrow,
            refunds,
            booking_horizon_months: env_parse("BOOKING_HORIZON_MONTHS", 6),
            gateway,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
