//! Phone-number flows backed by Firebase phone authentication. The client
//! completes the OTP exchange with Firebase and sends us the ID token.

use actix_web::{web, HttpResponse};
use mongodb::bson::{doc, DateTime};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::users::{complete_login, ensure_not_blocked, insert_user, users};
use crate::auth::hash_password;
use crate::config::{MongoConfig, Settings};
use crate::error::{ApiError, ApiResult};
use crate::gateways::{
    firebase::{e164, local_number},
    FirebaseAuth,
};
use crate::models::{
    user::validate_phone,
    Role, User,
};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpLoginRequest {
    pub id_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub new_password: String,
}

fn verified_phone(phone_number: Option<String>) -> ApiResult<String> {
    phone_number.ok_or_else(|| {
        ApiError::InvalidArgument("Phone number not found in verification token".into())
    })
}

pub async fn check_phone(
    db: web::Data<MongoConfig>,
    phone: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let phone = phone.trim();
    validate_phone(phone).map_err(|_| ApiError::InvalidArgument("Invalid phone number".into()))?;
    debug!("Checking whether {} is registered", phone);

    let user = users(&db)
        .find_one(doc! { "phone": phone }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("No account found with this phone number".into()))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "exists": true,
        "user": {
            "id": user.id.map(|id| id.to_hex()),
            "name": user.name,
            "phone": user.phone,
        },
    })))
}

/// Signs in with a verified phone number, creating the account on first use.
pub async fn login_with_otp(
    db: web::Data<MongoConfig>,
    settings: web::Data<Settings>,
    firebase: web::Data<FirebaseAuth>,
    body: web::Json<OtpLoginRequest>,
) -> ApiResult<HttpResponse> {
    let claims = firebase.verify_id_token(body.id_token.trim()).await?;
    let phone = local_number(&verified_phone(claims.phone_number)?).to_string();
    debug!("OTP login for {}", phone);

    let user = match users(&db).find_one(doc! { "phone": phone.as_str() }, None).await? {
        Some(user) => user,
        None => {
            let mut user = User::new(phone.clone(), String::new(), None, Role::User);
            let id = insert_user(&db, &mut user).await?;
            info!("Created user {} from phone verification", id);
            user
        }
    };
    ensure_not_blocked(&user)?;

    let response = complete_login(&db, &settings, &user).await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn reset_password(
    db: web::Data<MongoConfig>,
    firebase: web::Data<FirebaseAuth>,
    body: web::Json<ResetPasswordRequest>,
) -> ApiResult<HttpResponse> {
    if body.id_token.is_empty() || body.phone.is_empty() || body.new_password.is_empty() {
        return Err(ApiError::InvalidArgument(
            "ID token, phone, and new password are required".into(),
        ));
    }
    if body.new_password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::InvalidArgument(
            "Password must be at least 6 characters".into(),
        ));
    }

    let claims = firebase.verify_id_token(body.id_token.trim()).await?;
    let token_phone = verified_phone(claims.phone_number)?;
    if token_phone != e164(&body.phone) {
        warn!("Reset for {} presented a token for another number", body.phone);
        return Err(ApiError::InvalidArgument(
            "Phone number verification failed".into(),
        ));
    }

    let password_hash = hash_password(&body.new_password)?;
    let result = users(&db)
        .update_one(
            doc! { "phone": body.phone.trim() },
            doc! { "$set": { "passwordHash": password_hash, "updatedAt": DateTime::now() } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("User"));
    }

    info!("Password reset for {}", body.phone);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Password reset successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_without_phone_is_rejected() {
        assert!(matches!(verified_phone(None), Err(ApiError::InvalidArgument(_))));
        assert_eq!(verified_phone(Some("+919876543210".into())).unwrap(), "+919876543210");
    }

    #[test]
    fn reset_request_fields_default_to_empty() {
        let body: ResetPasswordRequest = serde_json::from_str(r#"{"phone":"9876543210"}"#).unwrap();
        assert!(body.id_token.is_empty());
        assert_eq!(e164(&body.phone), "+919876543210");
    }
}
