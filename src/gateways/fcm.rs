//! Firebase Cloud Messaging (HTTP v1) push delivery.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    /// Push is not configured.
    Disabled,
    /// The device token is no longer valid and should be forgotten.
    Unregistered,
    Failed(String),
}

pub struct PushPayload<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub data: HashMap<String, String>,
}

/// Google's OAuth grant for a service account.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
/// Lifetime requested for each minted access token.
const TOKEN_TTL_SECS: i64 = 3600;
/// A cached token is replaced this long before it expires.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl<'a> GrantClaims<'a> {
    fn new(client_email: &'a str, now: i64) -> Self {
        GrantClaims {
            iss: client_email,
            scope: MESSAGING_SCOPE,
            aud: TOKEN_URL,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now + REFRESH_MARGIN_SECS < self.expires_at
    }
}

enum Credentials {
    Disabled,
    /// A pre-issued bearer, used as is until it expires upstream.
    Static(String),
    ServiceAccount {
        client_email: String,
        key: EncodingKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl Credentials {
    fn from_settings(settings: &Settings) -> Self {
        if let (Some(client_email), Some(pem)) =
            (&settings.fcm_client_email, &settings.fcm_private_key)
        {
            // Keys pasted into env files usually carry escaped newlines.
            let pem = pem.replace("\\n", "\n");
            match EncodingKey::from_rsa_pem(pem.as_bytes()) {
                Ok(key) => {
                    return Credentials::ServiceAccount {
                        client_email: client_email.clone(),
                        key,
                        cached: Mutex::new(None),
                    }
                }
                Err(e) => warn!("Ignoring invalid FCM service account key: {}", e),
            }
        }

        match &settings.fcm_access_token {
            Some(token) => Credentials::Static(token.clone()),
            None => Credentials::Disabled,
        }
    }
}

pub struct Fcm {
    http: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
}

impl Fcm {
    pub fn new(settings: &Settings) -> Self {
        Fcm {
            http: reqwest::Client::new(),
            endpoint: format!(
                "https://fcm.googleapis.com/v1/projects/{}/messages:send",
                settings.firebase_project_id
            ),
            credentials: Credentials::from_settings(settings),
        }
    }

    /// Bearer for the send call. `None` when push is not configured.
    async fn access_token(&self) -> Option<Result<String, String>> {
        match &self.credentials {
            Credentials::Disabled => None,
            Credentials::Static(token) => Some(Ok(token.clone())),
            Credentials::ServiceAccount { client_email, key, cached } => {
                let mut cached = cached.lock().await;
                let now = Utc::now().timestamp();
                if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
                    return Some(Ok(token.value.clone()));
                }

                let minted = self.mint_token(client_email, key, now).await;
                if let Ok(token) = &minted {
                    *cached = Some(token.clone());
                }
                Some(minted.map(|t| t.value))
            }
        }
    }

    async fn mint_token(
        &self,
        client_email: &str,
        key: &EncodingKey,
        now: i64,
    ) -> Result<CachedToken, String> {
        debug!("Minting FCM access token for {}", client_email);
        let assertion = encode(
            &Header::new(Algorithm::RS256),
            &GrantClaims::new(client_email, now),
            key,
        )
        .map_err(|e| format!("failed to sign token grant: {}", e))?;

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| format!("token request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("token endpoint returned {}", status));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| format!("unexpected token response: {}", e))?;

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in,
        })
    }

    pub async fn send(&self, device_token: &str, payload: &PushPayload<'_>) -> PushOutcome {
        let access_token = match self.access_token().await {
            None => return PushOutcome::Disabled,
            Some(Ok(token)) => token,
            Some(Err(e)) => {
                warn!("No FCM access token: {}", e);
                return PushOutcome::Failed(e);
            }
        };

        let resp = match self
            .http
            .post(&self.endpoint)
            .bearer_auth(&access_token)
            .json(&message(device_token, payload))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return PushOutcome::Failed(e.to_string()),
        };

        let status = resp.status();
        if status.is_success() {
            debug!("Push delivered");
            return PushOutcome::Sent;
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if is_unregistered(&body) {
            PushOutcome::Unregistered
        } else {
            warn!("FCM returned {}: {}", status, body);
            PushOutcome::Failed(format!("FCM returned {}", status))
        }
    }
}

fn message(device_token: &str, payload: &PushPayload<'_>) -> Value {
    let mut data = payload.data.clone();
    data.insert("click_action".into(), "FLUTTER_NOTIFICATION_CLICK".into());

    json!({
        "message": {
            "token": device_token,
            "notification": { "title": payload.title, "body": payload.body },
            "data": data,
            "android": {
                "priority": "high",
                "notification": { "sound": "default", "channel_id": "high_importance_channel" }
            },
            "apns": { "payload": { "aps": { "sound": "default", "badge": 1 } } }
        }
    })
}

fn is_unregistered(body: &Value) -> bool {
    body["error"]["details"]
        .as_array()
        .map(|details| {
            details
                .iter()
                .any(|d| d["errorCode"].as_str() == Some("UNREGISTERED"))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_is_detected_from_error_details() {
        let body = json!({
            "error": {
                "code": 404,
                "status": "NOT_FOUND",
                "details": [
                    { "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError", "errorCode": "UNREGISTERED" }
                ]
            }
        });
        assert!(is_unregistered(&body));
        assert!(!is_unregistered(&json!({ "error": { "code": 500 } })));
        assert!(!is_unregistered(&Value::Null));
    }

    #[test]
    fn message_carries_data_and_click_action() {
        let payload = PushPayload {
            title: "Booking Confirmed",
            body: "See you soon",
            data: HashMap::from([("bookingId".to_string(), "abc".to_string())]),
        };
        let msg = message("device-1", &payload);
        assert_eq!(msg["message"]["token"], "device-1");
        assert_eq!(msg["message"]["data"]["bookingId"], "abc");
        assert_eq!(msg["message"]["data"]["click_action"], "FLUTTER_NOTIFICATION_CLICK");
    }

    #[test]
    fn grant_targets_messaging_scope_for_an_hour() {
        let claims = GrantClaims::new("push@salon.iam.gserviceaccount.com", 1_000);
        assert_eq!(claims.iss, "push@salon.iam.gserviceaccount.com");
        assert_eq!(claims.aud, TOKEN_URL);
        assert_eq!(claims.scope, MESSAGING_SCOPE);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn cached_token_is_replaced_before_expiry() {
        let token = CachedToken { value: "t".into(), expires_at: 10_000 };
        assert!(token.is_fresh(9_000));
        assert!(!token.is_fresh(9_940));
        assert!(!token.is_fresh(10_500));
    }

    #[actix_web::test]
    async fn static_token_is_used_and_absent_config_disables_push() {
        let mut settings = crate::config::Settings::for_tests();
        assert!(Fcm::new(&settings).access_token().await.is_none());

        settings.fcm_access_token = Some("ya29.static".into());
        let token = Fcm::new(&settings).access_token().await;
        assert_eq!(token, Some(Ok("ya29.static".to_string())));

        settings.fcm_client_email = Some("push@salon.iam.gserviceaccount.com".into());
        settings.fcm_private_key = Some("not a pem".into());
        let token = Fcm::new(&settings).access_token().await;
        assert_eq!(token, Some(Ok("ya29.static".to_string())), "a bad key falls back");
    }
}
