use actix_web::{web, HttpResponse};
use mongodb::bson::{doc, DateTime};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::users::{load_user, users};
use crate::auth::AuthUser;
use crate::config::MongoConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::user::{
    apply_referral, referral_code_for, NEW_USER_REFERRAL_BONUS, REFERRER_BONUS,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReferralRequest {
    pub referral_code: String,
}

pub async fn generate_code(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let me = load_user(&db, user.id).await?;
    if me.referral_code.is_some() {
        return Err(ApiError::InvalidState("Referral code already generated".into()));
    }

    let code = referral_code_for(&user.id);
    users(&db)
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": { "referralCode": code.as_str(), "updatedAt": DateTime::now() } },
            None,
        )
        .await?;

    info!("Referral code {} generated for {}", code, user.id);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "referralCode": code })))
}

pub async fn my_code(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let me = load_user(&db, user.id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "referralCode": me.referral_code,
        "wallet": me.wallet,
    })))
}

pub async fn apply_code(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    body: web::Json<ApplyReferralRequest>,
) -> ApiResult<HttpResponse> {
    let code = body.referral_code.trim().to_uppercase();
    debug!("{} applying referral code {}", user.id, code);

    let mut me = load_user(&db, user.id).await?;
    if me.referred_by.is_some() {
        return Err(ApiError::InvalidState("Referral already applied".into()));
    }

    let collection = users(&db);
    let mut referrer = collection
        .find_one(doc! { "referralCode": code.as_str() }, None)
        .await?
        .ok_or_else(|| ApiError::NotFound("Invalid referral code".into()))?;

    apply_referral(&mut me, &mut referrer)?;
    let referrer_id = referrer
        .id
        .ok_or_else(|| ApiError::Internal("user loaded without an id".into()))?;

    // Only one apply can match a user that has not been referred yet.
    let claimed = collection
        .update_one(
            doc! { "_id": user.id, "referredBy": null },
            doc! {
                "$set": { "referredBy": referrer_id, "updatedAt": DateTime::now() },
                "$inc": { "wallet": NEW_USER_REFERRAL_BONUS },
            },
            None,
        )
        .await?;
    if claimed.matched_count == 0 {
        return Err(ApiError::InvalidState("Referral already applied".into()));
    }
    collection
        .update_one(
            doc! { "_id": referrer_id },
            doc! { "$inc": { "wallet": REFERRER_BONUS } },
            None,
        )
        .await?;

    info!("Referral from {} applied to {}", referrer_id, user.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Referral applied successfully",
        "wallet": me.wallet,
    })))
}
