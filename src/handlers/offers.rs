use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime, Document},
    options::FindOptions,
    Collection,
};
use serde_json::json;
use tracing::{debug, info};

use crate::auth::AdminUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::gateways::ImageKit;
use crate::models::{collections, Offer};
use crate::upload::FormData;

const IMAGE_FOLDER: &str = "/offers";

fn offers(db: &MongoConfig) -> Collection<Offer> {
    db.collection(collections::OFFERS)
}

async fn find_offers(db: &MongoConfig, filter: Document) -> ApiResult<HttpResponse> {
    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    let list: Vec<Offer> = offers(db).find(filter, options).await?.try_collect().await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": list.len(),
        "data": list,
    })))
}

pub async fn list_offers(db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    debug!("Fetching offers");
    find_offers(&db, doc! {}).await
}

pub async fn active_offers(db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    debug!("Fetching active offers");
    find_offers(&db, doc! { "isActive": true }).await
}

pub async fn create_offer(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    images: web::Data<ImageKit>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let mut form = FormData::read(payload, "image").await?;
    let is_active = form.flag("isActive")?.unwrap_or(true);
    let file = form
        .file
        .take()
        .ok_or_else(|| ApiError::InvalidArgument("Offer image is required".into()))?;

    let image_url = file.store(&images, "offer", IMAGE_FOLDER).await?;
    let mut offer = Offer::new(image_url, is_active);
    let result = offers(&db).insert_one(&offer, None).await?;
    offer.id = result.inserted_id.as_object_id();

    info!("Offer created successfully with ID: {}", result.inserted_id);
    Ok(HttpResponse::Created().json(json!({ "success": true, "data": offer })))
}

pub async fn update_offer(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    images: web::Data<ImageKit>,
    id: web::Path<String>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let offer_id = parse_id(&id, "offer")?;
    let mut form = FormData::read(payload, "image").await?;

    let mut set = doc! { "updatedAt": DateTime::now() };
    if let Some(active) = form.flag("isActive")? {
        set.insert("isActive", active);
    }
    if let Some(file) = form.file.take() {
        set.insert("imageUrl", file.store(&images, "offer", IMAGE_FOLDER).await?);
    }

    let collection = offers(&db);
    let result = collection
        .update_one(doc! { "_id": offer_id }, doc! { "$set": set }, None)
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("Offer"));
    }

    let offer = collection.find_one(doc! { "_id": offer_id }, None).await?;
    info!("Offer updated successfully: {}", offer_id);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": offer })))
}

pub async fn delete_offer(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let offer_id = parse_id(&id, "offer")?;

    let result = offers(&db).delete_one(doc! { "_id": offer_id }, None).await?;
    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Offer"));
    }

    info!("Offer deleted successfully: {}", offer_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Offer deleted successfully",
    })))
}
