use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use mongodb::bson::oid::ObjectId;
use serde_json::json;
use tracing::error;

/// Every handler failure maps onto one of these and is rendered as
/// `{"success": false, "message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid signature, payment verification failed")]
    SignatureMismatch,
    #[error("{0}")]
    ExternalService(String),
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound(format!("{} not found", what))
    }

    /// True when MongoDB rejected a write because of a unique index.
    pub fn is_duplicate_key(&self) -> bool {
        use mongodb::error::{ErrorKind, WriteFailure};

        match self {
            ApiError::Database(e) => match e.kind.as_ref() {
                ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
                ErrorKind::Command(ce) => ce.code == 11000,
                _ => false,
            },
            _ => false,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidArgument(_)
            | ApiError::InvalidState(_)
            | ApiError::SignatureMismatch => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ApiError::Database(e) => {
                error!("Database error: {}", e);
                "Database error".to_string()
            }
            ApiError::Internal(msg) => {
                error!("Internal error: {}", msg);
                "Server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
        }))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<&str> = errors.field_errors().into_keys().collect();
        fields.sort_unstable();
        ApiError::InvalidArgument(format!("Invalid fields: {}", fields.join(", ")))
    }
}

impl From<mongodb::bson::ser::Error> for ApiError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        ApiError::Internal(format!("BSON serialization failed: {}", e))
    }
}

impl From<actix_multipart::MultipartError> for ApiError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        ApiError::InvalidArgument(format!("Malformed multipart body: {}", e))
    }
}

/// Parses a path/body id, reporting the kind of entity on failure.
pub fn parse_id(raw: &str, what: &str) -> ApiResult<ObjectId> {
    ObjectId::parse_str(raw.trim())
        .map_err(|_| ApiError::InvalidArgument(format!("Invalid {} ID format", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn envelope_carries_message_and_status() {
        let resp = ApiError::InvalidState("Only pending bookings can be cancelled".into())
            .error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "Only pending bookings can be cancelled");
    }

    #[actix_web::test]
    async fn internal_details_are_not_leaked() {
        let resp = ApiError::Internal("secret stack trace".into()).error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "Server error");
    }

    #[test]
    fn signature_mismatch_is_a_bad_request() {
        assert_eq!(ApiError::SignatureMismatch.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::not_found("Booking").to_string(),
            "Booking not found"
        );
    }

    #[test]
    fn parse_id_rejects_garbage() {
        assert!(parse_id("65f1c2a9e4b0a1b2c3d4e5f6", "booking").is_ok());
        let err = parse_id("nope", "booking").unwrap_err();
        assert_eq!(err.to_string(), "Invalid booking ID format");
    }
}
