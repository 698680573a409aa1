//! ImageKit upload API. Returns the public URL of the stored file.

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{error, info};

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    url: String,
    #[serde(default)]
    file_id: Option<String>,
}

pub struct ImageKit {
    http: reqwest::Client,
    private_key: String,
    upload_url: String,
}

impl ImageKit {
    pub fn new(settings: &Settings) -> Self {
        ImageKit {
            http: reqwest::Client::new(),
            private_key: settings.imagekit_private_key.clone(),
            upload_url: settings.imagekit_upload_url.clone(),
        }
    }

    pub async fn upload(&self, bytes: Vec<u8>, file_name: &str, folder: &str) -> ApiResult<String> {
        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name.to_string()))
            .text("fileName", file_name.to_string())
            .text("folder", folder.to_string());

        let resp = self
            .http
            .post(&self.upload_url)
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Image upload request failed: {}", e);
                ApiError::ExternalService("Image upload failed".into())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!("Image host returned {}: {}", status, body);
            return Err(ApiError::ExternalService("Image upload failed".into()));
        }

        let uploaded: UploadResponse = resp.json().await.map_err(|e| {
            error!("Unexpected image host response: {}", e);
            ApiError::ExternalService("Image upload failed".into())
        })?;

        info!(
            "Uploaded {} to {} ({})",
            file_name,
            folder,
            uploaded.file_id.as_deref().unwrap_or("no file id")
        );
        Ok(uploaded.url)
    }
}

/// `<prefix>_<millis>` plus the original extension, if any.
pub fn stored_file_name(prefix: &str, original: Option<&str>, millis: i64) -> String {
    let extension = original
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{}_{}.{}", prefix, millis, ext),
        None => format!("{}_{}", prefix, millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_keep_safe_extensions() {
        assert_eq!(stored_file_name("banner", Some("Promo.PNG"), 42), "banner_42.png");
        assert_eq!(stored_file_name("banner", Some("noext"), 42), "banner_42");
        assert_eq!(stored_file_name("service", None, 7), "service_7");
        assert_eq!(stored_file_name("service", Some("x.p/hp"), 7), "service_7");
    }
}
