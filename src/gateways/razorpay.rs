//! Razorpay integration via REST API (no SDK dependency)

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error};

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};

const API_BASE: &str = "https://api.razorpay.com/v1";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayOrder {
    pub id: String,
    /// Minor units (paise).
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentList {
    pub count: i64,
    pub items: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

pub struct Razorpay {
    http: reqwest::Client,
    key_id: String,
    key_secret: String,
}

impl Razorpay {
    pub fn new(settings: &Settings) -> Self {
        Self::with_keys(&settings.razorpay_key_id, &settings.razorpay_key_secret)
    }

    pub fn with_keys(key_id: &str, key_secret: &str) -> Self {
        Razorpay {
            http: reqwest::Client::new(),
            key_id: key_id.to_string(),
            key_secret: key_secret.to_string(),
        }
    }

    /// Publishable key handed to the checkout widget.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub async fn create_order(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> ApiResult<GatewayOrder> {
        debug!("Creating Razorpay order: {} {} ({})", amount_minor, currency, receipt);

        let resp = self
            .http
            .post(format!("{}/orders", API_BASE))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateOrderBody {
                amount: amount_minor,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| {
                error!("Razorpay create order request failed: {}", e);
                ApiError::ExternalService("Failed to create Razorpay order".into())
            })?;

        parse_response(resp, "Failed to create Razorpay order").await
    }

    pub async fn list_payments(&self, count: u32, skip: u32) -> ApiResult<PaymentList> {
        let resp = self
            .http
            .get(format!("{}/payments", API_BASE))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .query(&[("count", count), ("skip", skip)])
            .send()
            .await
            .map_err(|e| {
                error!("Razorpay list payments request failed: {}", e);
                ApiError::ExternalService("Failed to fetch transactions".into())
            })?;

        parse_response(resp, "Failed to fetch transactions").await
    }

    pub fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_payment_signature(&self.key_secret, order_id, payment_id, signature)
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    failure: &str,
) -> ApiResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        error!("Razorpay returned {}: {}", status, body);
        return Err(ApiError::ExternalService(failure.to_string()));
    }

    resp.json::<T>().await.map_err(|e| {
        error!("Unexpected Razorpay response: {}", e);
        ApiError::ExternalService(failure.to_string())
    })
}

/// Rupees to paise.
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Length of a hex-encoded HMAC-SHA256 digest.
const SIGNATURE_HEX_LEN: usize = 64;

/// Constant-time check of a client-supplied signature. Only the exact
/// lowercase hex string Razorpay produces is accepted.
pub fn verify_payment_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    let canonical = signature.len() == SIGNATURE_HEX_LEN
        && signature.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !canonical {
        return false;
    }
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let mut mac = new_mac(secret);
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    mac.verify_slice(&sig_bytes).is_ok()
}

fn new_mac(secret: &str) -> Hmac<Sha256> {
    Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

/// Hex HMAC-SHA256 of `order_id|payment_id`, as Razorpay signs it.
#[cfg(test)]
pub(crate) fn payment_signature(secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
