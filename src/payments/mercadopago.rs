use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::GatewayConfig;
use crate::error::{AppError, Result, msg};

use super::{CheckoutRequest, CheckoutSession, GatewayMerchantOrder, GatewayPayment, PaymentGateway};

type HmacSha256 = Hmac<Sha256>;

/// Mercado Pago amounts are decimal currency units; everything local is cents.
fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

fn to_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Mercado Pago sends numeric ids in some payloads and strings in others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MpId {
    Num(u64),
    Str(String),
}

impl std::fmt::Display for MpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MpId::Num(n) => write!(f, "{}", n),
            MpId::Str(s) => f.write_str(s),
        }
    }
}

// ============ GET /v1/payments/{id} ============

#[derive(Debug, Deserialize)]
struct MpPayment {
    id: MpId,
    status: String,
    status_detail: Option<String>,
    external_reference: Option<String>,
    transaction_amount: f64,
    currency_id: Option<String>,
    payment_method_id: Option<String>,
    installments: Option<i32>,
    transaction_details: Option<MpTransactionDetails>,
    #[serde(default)]
    fee_details: Vec<MpFeeDetail>,
}

#[derive(Debug, Deserialize)]
struct MpTransactionDetails {
    net_received_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct MpFeeDetail {
    amount: f64,
}

impl From<MpPayment> for GatewayPayment {
    fn from(p: MpPayment) -> Self {
        let fee_cents = if p.fee_details.is_empty() {
            None
        } else {
            Some(p.fee_details.iter().map(|f| to_cents(f.amount)).sum())
        };
        GatewayPayment {
            id: p.id.to_string(),
            status: p.status,
            status_detail: p.status_detail,
            external_reference: p.external_reference.filter(|r| !r.is_empty()),
            amount_cents: to_cents(p.transaction_amount),
            currency: p.currency_id.map(|c| c.to_lowercase()),
            payment_method_id: p.payment_method_id,
            installments: p.installments,
            net_received_cents: p
                .transaction_details
                .and_then(|d| d.net_received_amount)
                .map(to_cents),
            fee_cents,
        }
    }
}

// ============ GET /merchant_orders/{id} ============

#[derive(Debug, Deserialize)]
struct MpMerchantOrder {
    id: MpId,
    external_reference: Option<String>,
    preference_id: Option<String>,
    #[serde(default)]
    payments: Vec<MpOrderPayment>,
}

#[derive(Debug, Deserialize)]
struct MpOrderPayment {
    id: MpId,
    status: String,
    status_detail: Option<String>,
    #[serde(default)]
    transaction_amount: f64,
    currency_id: Option<String>,
}

impl From<MpMerchantOrder> for GatewayMerchantOrder {
    fn from(o: MpMerchantOrder) -> Self {
        let external_reference = o.external_reference.filter(|r| !r.is_empty());
        GatewayMerchantOrder {
            id: o.id.to_string(),
            preference_id: o.preference_id,
            payments: o
                .payments
                .into_iter()
                .map(|p| GatewayPayment {
                    id: p.id.to_string(),
                    status: p.status,
                    status_detail: p.status_detail,
                    external_reference: external_reference.clone(),
                    amount_cents: to_cents(p.transaction_amount),
                    currency: p.currency_id.map(|c| c.to_lowercase()),
                    ..Default::default()
                })
                .collect(),
            external_reference,
        }
    }
}

// ============ POST /checkout/preferences ============

#[derive(Debug, Serialize)]
struct MpPreferenceRequest<'a> {
    items: Vec<MpPreferenceItem<'a>>,
    external_reference: &'a str,
    notification_url: &'a str,
    back_urls: MpBackUrls<'a>,
    auto_return: &'static str,
    metadata: MpPreferenceMetadata<'a>,
}

#[derive(Debug, Serialize)]
struct MpPreferenceItem<'a> {
    id: &'a str,
    title: &'a str,
    quantity: u32,
    unit_price: f64,
    currency_id: String,
}

#[derive(Debug, Serialize)]
struct MpBackUrls<'a> {
    success: &'a str,
    failure: &'a str,
    pending: &'a str,
}

#[derive(Debug, Serialize)]
struct MpPreferenceMetadata<'a> {
    payment_id: &'a str,
    payer_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MpPreferenceResponse {
    id: String,
    init_point: String,
}

/// Mercado Pago REST client.
#[derive(Debug, Clone)]
pub struct MercadoPagoClient {
    client: Client,
    api_base_url: String,
    access_token: String,
}

impl MercadoPagoClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base_url, path))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Mercado Pago GET {} returned {}: {}",
                path, status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Mercado Pago response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    async fn get_payment(&self, id: &str) -> Result<GatewayPayment> {
        let payment: MpPayment = self.get_json(&format!("/v1/payments/{}", id)).await?;
        Ok(payment.into())
    }

    async fn get_merchant_order(&self, id: &str) -> Result<GatewayMerchantOrder> {
        let order: MpMerchantOrder = self.get_json(&format!("/merchant_orders/{}", id)).await?;
        Ok(order.into())
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let body = MpPreferenceRequest {
            items: vec![MpPreferenceItem {
                id: &request.booking_id,
                title: &request.title,
                quantity: 1,
                unit_price: to_units(request.amount_cents),
                currency_id: request.currency.to_uppercase(),
            }],
            external_reference: &request.booking_id,
            notification_url: &request.notification_url,
            back_urls: MpBackUrls {
                success: &request.success_url,
                failure: &request.failure_url,
                pending: &request.pending_url,
            },
            auto_return: "approved",
            metadata: MpPreferenceMetadata {
                payment_id: &request.payment_id,
                payer_id: &request.payer_id,
            },
        };

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.api_base_url))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", &request.payment_id)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "Mercado Pago preference creation returned {}: {}",
                status, error_text
            )));
        }

        let preference: MpPreferenceResponse = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse Mercado Pago response: {}", e)))?;

        Ok(CheckoutSession {
            preference_id: preference.id,
            checkout_url: preference.init_point,
        })
    }
}

// ============ Webhook signatures ============

/// Maximum age of a webhook signature timestamp before it's rejected (in seconds).
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verify an `x-signature` header (`ts=...,v1=...`).
///
/// The signed manifest is `id:{data.id};request-id:{x-request-id};ts:{ts};`, with
/// the `request-id` part left out when the header is absent. Malformed headers are
/// errors; a well-formed header that does not match (or is stale) is `Ok(false)`.
pub fn verify_webhook_signature(
    secret: &str,
    signature: &str,
    request_id: Option<&str>,
    data_id: &str,
    now: i64,
) -> Result<bool> {
    let mut ts = None;
    let mut v1 = None;

    for part in signature.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ts" => ts = Some(value.trim()),
            "v1" => v1 = Some(value.trim()),
            _ => {}
        }
    }

    let ts_str = ts.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
    let v1 = v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

    let mut ts_secs: i64 = ts_str
        .parse()
        .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;
    // Some deliveries carry milliseconds
    if ts_secs > 100_000_000_000 {
        ts_secs /= 1000;
    }

    let Some(age) = now.checked_sub(ts_secs) else {
        tracing::warn!("Mercado Pago webhook rejected: timestamp {} out of range", ts_secs);
        return Ok(false);
    };
    if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Mercado Pago webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            WEBHOOK_TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }
    if age < -60 {
        tracing::warn!("Mercado Pago webhook rejected: timestamp in the future (age={}s)", age);
        return Ok(false);
    }

    let expected = sign_manifest(secret, &signature_manifest(data_id, request_id, ts_str))?;

    let expected_bytes = expected.as_bytes();
    let provided = v1.to_ascii_lowercase();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

fn signature_manifest(data_id: &str, request_id: Option<&str>, ts: &str) -> String {
    let mut manifest = format!("id:{};", data_id.to_lowercase());
    if let Some(request_id) = request_id {
        manifest.push_str(&format!("request-id:{};", request_id));
    }
    manifest.push_str(&format!("ts:{};", ts));
    manifest
}

fn sign_manifest(secret: &str, manifest: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
    mac.update(manifest.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a valid `x-signature` header value, as Mercado Pago would send it.
pub fn sign_webhook(secret: &str, request_id: Option<&str>, data_id: &str, ts: i64) -> Result<String> {
    let v1 = sign_manifest(secret, &signature_manifest(data_id, request_id, &ts.to_string()))?;
    Ok(format!("ts={},v1={}", ts, v1))
}
