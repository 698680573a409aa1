use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::users::{load_user, users};
use crate::auth::AuthUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::models::{collections, Service};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavouriteRequest {
    pub service_id: String,
}

pub async fn add_favourite(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    body: web::Json<FavouriteRequest>,
) -> ApiResult<HttpResponse> {
    let service_id = parse_id(&body.service_id, "service")?;
    debug!("Adding favourite {} for {}", service_id, user.id);

    db.collection::<Service>(collections::SERVICES)
        .find_one(doc! { "_id": service_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Service"))?;

    let result = users(&db)
        .update_one(
            doc! { "_id": user.id, "favorites": { "$ne": service_id } },
            doc! { "$push": { "favorites": service_id } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        // Either the user is gone or the service is already a favourite.
        load_user(&db, user.id).await?;
        return Err(ApiError::InvalidState("Service already in favourites".into()));
    }

    info!("Favourite {} added for {}", service_id, user.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Added to favourites",
    })))
}

pub async fn remove_favourite(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    service_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let service_id = parse_id(&service_id, "service")?;
    debug!("Removing favourite {} for {}", service_id, user.id);

    let result = users(&db)
        .update_one(
            doc! { "_id": user.id },
            doc! { "$pull": { "favorites": service_id } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("User"));
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Removed from favourites",
    })))
}

pub async fn list_favourites(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let me = load_user(&db, user.id).await?;

    let services: Vec<Service> = db
        .collection::<Service>(collections::SERVICES)
        .find(doc! { "_id": { "$in": me.favorites.clone() } }, None)
        .await?
        .try_collect()
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": services.len(),
        "favourites": services,
    })))
}
