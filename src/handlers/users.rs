use actix_web::{web, HttpResponse};
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime},
    Collection,
};
use serde_json::json;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::auth::{hash_password, issue_token, verify_password, AuthUser};
use crate::config::{MongoConfig, Settings};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    collections,
    user::{FcmTokenRequest, LoginRequest, RegisterRequest, UpdateProfileRequest},
    Role, User, UserProfile,
};

pub(crate) fn users(db: &MongoConfig) -> Collection<User> {
    db.collection(collections::USERS)
}

pub(crate) async fn load_user(db: &MongoConfig, id: ObjectId) -> ApiResult<User> {
    users(db)
        .find_one(doc! { "_id": id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))
}

/// Inserts a new user, mapping a phone collision to a conflict.
pub(crate) async fn insert_user(db: &MongoConfig, user: &mut User) -> ApiResult<ObjectId> {
    let result = users(db).insert_one(&*user, None).await.map_err(|e| {
        let e = ApiError::from(e);
        if e.is_duplicate_key() {
            ApiError::Conflict("User already exists".into())
        } else {
            e
        }
    })?;
    let id = result
        .inserted_id
        .as_object_id()
        .ok_or_else(|| ApiError::Internal("insert returned a non-ObjectId key".into()))?;
    user.id = Some(id);
    Ok(id)
}

pub(crate) fn ensure_not_blocked(user: &User) -> ApiResult<()> {
    if user.is_blocked {
        warn!("Blocked user {:?} attempted to log in", user.id);
        return Err(ApiError::Forbidden(
            "Your account has been blocked. Please contact support.".into(),
        ));
    }
    Ok(())
}

/// Stamps the login time and returns the token response body.
pub(crate) async fn complete_login(
    db: &MongoConfig,
    settings: &Settings,
    user: &User,
) -> ApiResult<serde_json::Value> {
    let id = user
        .id
        .ok_or_else(|| ApiError::Internal("user loaded without an id".into()))?;
    users(db)
        .update_one(
            doc! { "_id": id },
            doc! { "$set": { "lastLogin": DateTime::now() } },
            None,
        )
        .await?;

    let token = issue_token(&id, user.role, settings)?;
    Ok(json!({
        "success": true,
        "token": token,
        "user": UserProfile::from(user),
    }))
}

pub async fn register(
    db: web::Data<MongoConfig>,
    settings: web::Data<Settings>,
    body: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let request = body.into_inner();
    debug!("Registering user with phone {}", request.phone);

    if users(&db)
        .find_one(doc! { "phone": request.phone.as_str() }, None)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("User already exists".into()));
    }

    let mut user = User::new(request.phone, request.name, request.email, Role::User);
    user.password_hash = Some(hash_password(&request.password)?);
    let id = insert_user(&db, &mut user).await?;

    let token = issue_token(&id, user.role, &settings)?;
    info!("User registered successfully with ID: {}", id);
    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "token": token,
        "user": UserProfile::from(&user),
    })))
}

pub async fn login(
    db: web::Data<MongoConfig>,
    settings: web::Data<Settings>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    debug!("Login attempt for {}", body.phone);
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());

    let user = users(&db)
        .find_one(doc! { "phone": body.phone.trim() }, None)
        .await?
        .ok_or_else(invalid)?;
    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(&body.password, hash)? {
        return Err(invalid());
    }
    ensure_not_blocked(&user)?;

    let response = complete_login(&db, &settings, &user).await?;
    info!("User {:?} logged in", user.id);
    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_profile(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let profile = load_user(&db, user.id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user": UserProfile::from(&profile),
    })))
}

pub async fn update_profile(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    body: web::Json<UpdateProfileRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    debug!("Updating profile of {}: {:?}", user.id, body);

    let mut set = doc! { "updatedAt": DateTime::now() };
    if let Some(name) = &body.name {
        set.insert("name", name.trim());
    }
    if let Some(email) = &body.email {
        set.insert("email", email.trim().to_lowercase());
    }

    let result = users(&db)
        .update_one(doc! { "_id": user.id }, doc! { "$set": set }, None)
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("User"));
    }

    let updated = load_user(&db, user.id).await?;
    info!("Profile updated for {}", user.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user": UserProfile::from(&updated),
    })))
}

pub async fn save_fcm_token(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    body: web::Json<FcmTokenRequest>,
) -> ApiResult<HttpResponse> {
    let token = body.token.trim();
    if token.is_empty() {
        return Err(ApiError::InvalidArgument("FCM token is required".into()));
    }

    let result = users(&db)
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": { "fcmToken": token, "updatedAt": DateTime::now() } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("User"));
    }

    info!("Device token stored for {}", user.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "FCM token updated",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_users_cannot_log_in() {
        let mut user = User::new("9876543210".into(), "Meera".into(), None, Role::User);
        assert!(ensure_not_blocked(&user).is_ok());

        user.is_blocked = true;
        assert!(matches!(ensure_not_blocked(&user), Err(ApiError::Forbidden(_))));
    }
}
