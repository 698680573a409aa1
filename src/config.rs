use std::env;

use dotenv::dotenv;
use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client, Collection, Database, IndexModel,
};
use tracing::{error, info, warn};

use crate::models::collections;

const DEFAULT_IMAGEKIT_UPLOAD_URL: &str = "https://upload.imagekit.io/api/v1/files/upload";

/// Process-wide settings read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub mongo_uri_fallback: Option<String>,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    pub admin_jwt_ttl_days: i64,
    pub admin_secret_key: String,
    pub razorpay_key_id: String,
    pub razorpay_key_secret: String,
    pub imagekit_private_key: String,
    pub imagekit_upload_url: String,
    pub firebase_project_id: String,
    /// Pre-issued OAuth bearer for FCM. Google access tokens expire after
    /// about an hour, so this only suits short runs; prefer the service
    /// account pair below, which is exchanged for fresh tokens as needed.
    pub fcm_access_token: Option<String>,
    pub fcm_client_email: Option<String>,
    /// PEM private key of the service account; `\n` escapes are accepted.
    pub fcm_private_key: Option<String>,
    pub sweep_interval_secs: u64,
    pub payment_window_mins: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {name} is not a valid number: {value}")]
    NotANumber { name: &'static str, value: String },
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        Ok(Settings {
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            mongo_uri: optional("MONGODB_URI")
                .unwrap_or_else(|| "mongodb://localhost:27017".to_string()),
            mongo_uri_fallback: optional("MONGODB_URI_STANDARD"),
            database_name: optional("DATABASE_NAME").unwrap_or_else(|| "salon_db".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_ttl_days: number("JWT_TTL_DAYS", 7)?,
            admin_jwt_ttl_days: number("ADMIN_JWT_TTL_DAYS", 365)?,
            admin_secret_key: required("ADMIN_SECRET_KEY")?,
            razorpay_key_id: required("RAZORPAY_KEY_ID")?,
            razorpay_key_secret: required("RAZORPAY_KEY_SECRET")?,
            imagekit_private_key: required("IMAGEKIT_PRIVATE_KEY")?,
            imagekit_upload_url: optional("IMAGEKIT_UPLOAD_URL")
                .unwrap_or_else(|| DEFAULT_IMAGEKIT_UPLOAD_URL.to_string()),
            firebase_project_id: required("FIREBASE_PROJECT_ID")?,
            fcm_access_token: optional("FCM_ACCESS_TOKEN"),
            fcm_client_email: optional("FCM_CLIENT_EMAIL"),
            fcm_private_key: optional("FCM_PRIVATE_KEY"),
            sweep_interval_secs: number("SWEEP_INTERVAL_SECS", 60)?,
            payment_window_mins: number("PAYMENT_WINDOW_MINS", 5)?,
        })
    }
}

#[cfg(test)]
impl Settings {
    pub fn for_tests() -> Self {
        Settings {
            bind_addr: "127.0.0.1:0".into(),
            mongo_uri: "mongodb://localhost:27017".into(),
            mongo_uri_fallback: None,
            database_name: "salon_test".into(),
            jwt_secret: "test-secret".into(),
            jwt_ttl_days: 7,
            admin_jwt_ttl_days: 365,
            admin_secret_key: "admin-key".into(),
            razorpay_key_id: "rzp_test".into(),
            razorpay_key_secret: "rzp_secret".into(),
            imagekit_private_key: "ik".into(),
            imagekit_upload_url: "http://localhost/upload".into(),
            firebase_project_id: "salon-test".into(),
            fcm_access_token: None,
            fcm_client_email: None,
            fcm_private_key: None,
            sweep_interval_secs: 60,
            payment_window_mins: 5,
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::NotANumber { name, value }),
        None => Ok(default),
    }
}

#[derive(Clone)]
pub struct MongoConfig {
    pub client: Client,
    pub database: Database,
}

impl MongoConfig {
    /// Connects with the primary URI and falls back to the standard
    /// (non-SRV) URI once if the first attempt fails.
    pub async fn init(settings: &Settings) -> Result<Self, mongodb::error::Error> {
        let client = match connect(&settings.mongo_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("MongoDB connection error (primary): {}", e);
                match &settings.mongo_uri_fallback {
                    Some(fallback) => {
                        warn!("Attempting fallback to standard connection string");
                        connect(fallback).await?
                    }
                    None => return Err(e),
                }
            }
        };

        let database = client.database(&settings.database_name);
        let config = MongoConfig { client, database };
        config.ensure_indexes().await?;

        Ok(config)
    }

    pub fn collection<T>(&self, name: &str) -> Collection<T> {
        self.database.collection(name)
    }

    async fn ensure_indexes(&self) -> Result<(), mongodb::error::Error> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.index(collections::CATEGORIES, doc! { "name": 1 }, Some(unique())).await?;
        self.index(collections::CARTS, doc! { "user": 1 }, Some(unique())).await?;
        self.index(collections::USERS, doc! { "phone": 1 }, Some(unique())).await?;
        self.index(collections::BEAUTICIANS, doc! { "phone": 1 }, Some(unique())).await?;
        self.index(collections::NOTIFICATIONS, doc! { "user": 1, "createdAt": -1 }, None).await?;
        self.index(collections::BOOKINGS, doc! { "user": 1, "createdAt": -1 }, None).await?;
        self.index(
            collections::BOOKINGS,
            doc! { "paymentMethod": 1, "paymentStatus": 1, "createdAt": 1 },
            None,
        )
        .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }

    async fn index(
        &self,
        collection: &str,
        keys: Document,
        options: Option<IndexOptions>,
    ) -> Result<(), mongodb::error::Error> {
        let model = IndexModel::builder().keys(keys).options(options).build();
        self.database
            .collection::<Document>(collection)
            .create_index(model, None)
            .await?;
        Ok(())
    }
}

async fn connect(uri: &str) -> Result<Client, mongodb::error::Error> {
    let client = Client::with_uri_str(uri).await?;
    // The driver connects lazily; ping so a bad URI fails here.
    client
        .database("admin")
        .run_command(doc! { "ping": 1 }, None)
        .await?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_falls_back_to_default_when_unset() {
        let value: u64 = number("SALON_TEST_UNSET_NUMBER", 60).unwrap();
        assert_eq!(value, 60);
    }

    #[test]
    fn number_rejects_garbage() {
        env::set_var("SALON_TEST_BAD_NUMBER", "soon");
        let err = number::<u64>("SALON_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(matches!(err, ConfigError::NotANumber { .. }));
    }

    #[test]
    fn blank_values_count_as_missing() {
        env::set_var("SALON_TEST_BLANK", "   ");
        assert!(matches!(
            required("SALON_TEST_BLANK"),
            Err(ConfigError::Missing("SALON_TEST_BLANK"))
        ));
    }
}
