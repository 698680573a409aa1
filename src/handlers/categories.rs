use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime},
    options::FindOptions,
    Collection,
};
use serde_json::json;
use tracing::{debug, info};
use validator::Validate;

use crate::auth::AdminUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::gateways::ImageKit;
use crate::models::{catalog::CategoryFields, collections, Category};
use crate::upload::FormData;

const IMAGE_FOLDER: &str = "/categories";

fn categories(db: &MongoConfig) -> Collection<Category> {
    db.collection(collections::CATEGORIES)
}

fn fields_from(form: &FormData) -> ApiResult<CategoryFields> {
    let fields = CategoryFields {
        name: form.text("name").map(str::to_string),
        description: form.text("description").map(str::to_string),
        is_active: form.flag("isActive")?,
    };
    fields.validate()?;
    Ok(fields)
}

fn duplicate_name(e: mongodb::error::Error) -> ApiError {
    let e = ApiError::from(e);
    if e.is_duplicate_key() {
        ApiError::Conflict("Category already exists".into())
    } else {
        e
    }
}

pub async fn list_categories(db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    debug!("Fetching categories");

    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    let list: Vec<Category> = categories(&db).find(None, options).await?.try_collect().await?;

    info!("Retrieved {} categories", list.len());
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": list.len(),
        "data": list,
    })))
}

pub async fn get_category(
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let category_id = parse_id(&id, "category")?;
    debug!("Fetching category with ID: {}", category_id);

    let category = categories(&db)
        .find_one(doc! { "_id": category_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Category"))?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": category })))
}

pub async fn create_category(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    images: web::Data<ImageKit>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let mut form = FormData::read(payload, "image").await?;
    let fields = fields_from(&form)?;
    let name = fields
        .name
        .ok_or_else(|| ApiError::InvalidArgument("Category name is required".into()))?;

    debug!("Creating category: {}", name);

    let image_url = match form.file.take() {
        Some(file) => Some(file.store(&images, "category", IMAGE_FOLDER).await?),
        None => None,
    };

    let now = DateTime::now();
    let mut category = Category {
        id: None,
        name,
        description: fields.description,
        image_url,
        is_active: fields.is_active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    let result = categories(&db)
        .insert_one(&category, None)
        .await
        .map_err(duplicate_name)?;
    category.id = result.inserted_id.as_object_id();

    info!("Category created successfully with ID: {}", result.inserted_id);
    Ok(HttpResponse::Created().json(json!({ "success": true, "data": category })))
}

pub async fn update_category(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    images: web::Data<ImageKit>,
    id: web::Path<String>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let category_id = parse_id(&id, "category")?;
    let mut form = FormData::read(payload, "image").await?;
    let fields = fields_from(&form)?;

    debug!("Updating category {}", category_id);

    let mut set = doc! { "updatedAt": DateTime::now() };
    if let Some(name) = fields.name {
        set.insert("name", name);
    }
    if let Some(description) = fields.description {
        set.insert("description", description);
    }
    if let Some(active) = fields.is_active {
        set.insert("isActive", active);
    }
    if let Some(file) = form.file.take() {
        set.insert("imageUrl", file.store(&images, "category", IMAGE_FOLDER).await?);
    }

    let collection = categories(&db);
    let result = collection
        .update_one(doc! { "_id": category_id }, doc! { "$set": set }, None)
        .await
        .map_err(duplicate_name)?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("Category"));
    }

    let category = collection.find_one(doc! { "_id": category_id }, None).await?;
    info!("Category updated successfully: {}", category_id);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": category })))
}

pub async fn delete_category(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let category_id = parse_id(&id, "category")?;
    debug!("Deleting category: {}", category_id);

    let result = categories(&db)
        .delete_one(doc! { "_id": category_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Category"));
    }

    info!("Category deleted successfully: {}", category_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Category deleted successfully",
    })))
}
