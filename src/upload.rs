//! Reads `multipart/form-data` bodies used by the admin catalog routes.

use std::collections::HashMap;

use actix_multipart::Multipart;
use futures::TryStreamExt;
use mongodb::bson::DateTime;

use crate::error::{ApiError, ApiResult};
use crate::gateways::{imagekit::stored_file_name, ImageKit};

/// Maximum image size (5MB)
pub const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;
const MAX_TEXT_SIZE: usize = 64 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Sends the file to the image host and returns its public URL.
    pub async fn store(self, images: &ImageKit, prefix: &str, folder: &str) -> ApiResult<String> {
        let name = stored_file_name(
            prefix,
            self.file_name.as_deref(),
            DateTime::now().timestamp_millis(),
        );
        images.upload(self.bytes, &name, folder).await
    }
}

/// Text parts by name plus the single file part, if one was sent.
#[derive(Debug, Default)]
pub struct FormData {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl FormData {
    pub async fn read(mut payload: Multipart, file_field: &str) -> ApiResult<Self> {
        let mut form = FormData::default();

        while let Some(mut field) = payload.try_next().await? {
            let disposition = field.content_disposition();
            let name = disposition.get_name().unwrap_or_default().to_string();
            let file_name = disposition.get_filename().map(str::to_string);

            if name == file_field {
                let bytes = read_limited(&mut field, MAX_FILE_SIZE, "Image").await?;
                if bytes.is_empty() {
                    continue;
                }
                check_image_name(file_name.as_deref())?;
                form.file = Some(UploadedFile { file_name, bytes });
            } else {
                let bytes = read_limited(&mut field, MAX_TEXT_SIZE, &name).await?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    ApiError::InvalidArgument(format!("Field {} is not valid text", name))
                })?;
                form.fields.insert(name, text);
            }
        }

        Ok(form)
    }

    /// Non-blank text value of a part.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn flag(&self, name: &str) -> ApiResult<Option<bool>> {
        match self.text(name) {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(_) => Err(ApiError::InvalidArgument(format!(
                "{} must be true or false",
                name
            ))),
        }
    }
}

async fn read_limited(
    field: &mut actix_multipart::Field,
    limit: usize,
    what: &str,
) -> ApiResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if bytes.len() + chunk.len() > limit {
            return Err(ApiError::InvalidArgument(format!(
                "{} too large. Maximum size is {} bytes",
                what, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn check_image_name(file_name: Option<&str>) -> ApiResult<()> {
    let Some(name) = file_name else {
        return Ok(());
    };
    match name.rsplit_once('.') {
        Some((_, ext)) if IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => Ok(()),
        None => Ok(()),
        Some(_) => Err(ApiError::InvalidArgument(
            "Unsupported image format. Use PNG, JPEG, WebP or GIF".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names() {
        assert!(check_image_name(Some("banner.PNG")).is_ok());
        assert!(check_image_name(Some("blob")).is_ok());
        assert!(check_image_name(None).is_ok());
        assert!(check_image_name(Some("script.sh")).is_err());
    }

    #[test]
    fn text_and_flags() {
        let form = FormData {
            fields: HashMap::from([
                ("name".to_string(), "  Hair  ".to_string()),
                ("blank".to_string(), "   ".to_string()),
                ("isActive".to_string(), "false".to_string()),
                ("isPopular".to_string(), "yes".to_string()),
            ]),
            file: None,
        };
        assert_eq!(form.text("name"), Some("Hair"));
        assert_eq!(form.text("blank"), None);
        assert_eq!(form.flag("isActive").unwrap(), Some(false));
        assert_eq!(form.flag("missing").unwrap(), None);
        assert!(form.flag("isPopular").is_err());
    }
}
