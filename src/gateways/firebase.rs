//! Firebase phone-auth ID token verification.

use std::time::{Duration, Instant};

use jsonwebtoken::{
    decode, decode_header, errors::ErrorKind, jwk::JwkSet, Algorithm, DecodingKey, Validation,
};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const JWKS_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Deserialize)]
pub struct FirebaseClaims {
    pub sub: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub exp: i64,
}

pub struct FirebaseAuth {
    http: reqwest::Client,
    project_id: String,
    keys: RwLock<Option<(JwkSet, Instant)>>,
}

impl FirebaseAuth {
    pub fn new(settings: &Settings) -> Self {
        FirebaseAuth {
            http: reqwest::Client::new(),
            project_id: settings.firebase_project_id.clone(),
            keys: RwLock::new(None),
        }
    }

    pub async fn verify_id_token(&self, id_token: &str) -> ApiResult<FirebaseClaims> {
        let header = decode_header(id_token).map_err(|e| {
            debug!("Malformed ID token header: {}", e);
            invalid_token()
        })?;
        let kid = header.kid.ok_or_else(invalid_token)?;
        let jwks = self.signing_keys().await?;
        let jwk = jwks.find(&kid).ok_or_else(|| {
            debug!("ID token signed with unknown key {}", kid);
            invalid_token()
        })?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| {
            error!("Unusable Firebase signing key {}: {}", kid, e);
            ApiError::ExternalService("Phone verification is unavailable".into())
        })?;

        decode::<FirebaseClaims>(id_token, &key, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ApiError::InvalidArgument(
                    "Verification session expired. Please request a new OTP.".into(),
                ),
                _ => {
                    debug!("ID token rejected: {}", e);
                    invalid_token()
                }
            })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation
    }

    async fn signing_keys(&self) -> ApiResult<JwkSet> {
        if let Some((keys, fetched)) = self.keys.read().await.as_ref() {
            if fetched.elapsed() < JWKS_TTL {
                return Ok(keys.clone());
            }
        }

        let keys: JwkSet = self
            .http
            .get(JWKS_URL)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Failed to fetch Firebase signing keys: {}", e);
                ApiError::ExternalService("Phone verification is unavailable".into())
            })?
            .json()
            .await
            .map_err(|e| {
                error!("Malformed Firebase signing keys: {}", e);
                ApiError::ExternalService("Phone verification is unavailable".into())
            })?;

        info!("Fetched {} Firebase signing keys", keys.keys.len());
        *self.keys.write().await = Some((keys.clone(), Instant::now()));
        Ok(keys)
    }
}

fn invalid_token() -> ApiError {
    ApiError::InvalidArgument("Invalid verification. Please try again.".into())
}

/// Local numbers are verified as `+91XXXXXXXXXX`.
pub fn e164(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with('+') {
        phone.to_string()
    } else {
        format!("+91{}", phone)
    }
}

/// Strips the country code Firebase reports back to a local number.
pub fn local_number(e164_phone: &str) -> &str {
    e164_phone.strip_prefix("+91").unwrap_or(e164_phone)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formats() {
        assert_eq!(e164("9876543210"), "+919876543210");
        assert_eq!(e164("+14155550100"), "+14155550100");
        assert_eq!(local_number("+919876543210"), "9876543210");
        assert_eq!(local_number("+14155550100"), "+14155550100");
    }

    #[actix_web::test]
    async fn garbage_tokens_are_rejected_before_any_fetch() {
        let auth = FirebaseAuth {
            http: reqwest::Client::new(),
            project_id: "salon-test".into(),
            keys: RwLock::new(None),
        };
        let err = auth.verify_id_token("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }
}
