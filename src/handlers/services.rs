use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document, Regex},
    options::FindOptions,
    Collection,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use validator::Validate;

use crate::auth::AdminUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::gateways::ImageKit;
use crate::models::{
    catalog::{CreateServiceRequest, UpdateServiceRequest},
    collections, Category, Service,
};
use crate::upload::FormData;

const IMAGE_FOLDER: &str = "/services";

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub category: Option<String>,
    pub popular: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

fn services(db: &MongoConfig) -> Collection<Service> {
    db.collection(collections::SERVICES)
}

fn newest_first() -> FindOptions {
    FindOptions::builder().sort(doc! { "createdAt": -1 }).build()
}

fn list_filter(query: &ServiceQuery) -> ApiResult<Document> {
    let mut filter = doc! {};
    if let Some(category) = &query.category {
        filter.insert("category", parse_id(category, "category")?);
    }
    if let Some(popular) = query.popular {
        filter.insert("isPopular", popular);
    }
    if let Some(active) = query.active {
        filter.insert("isActive", active);
    }
    Ok(filter)
}

/// Case-insensitive substring match on name or description. The term is
/// matched literally.
fn search_filter(term: &str) -> Document {
    let pattern = Regex {
        pattern: regex::escape(term),
        options: "i".to_string(),
    };
    doc! {
        "$or": [
            { "name": pattern.clone() },
            { "description": pattern },
        ]
    }
}

/// The `data` part carries the service fields as JSON.
fn json_part<T: for<'de> Deserialize<'de>>(form: &FormData) -> ApiResult<Option<T>> {
    form.text("data")
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| ApiError::InvalidArgument(format!("Invalid service data: {}", e)))
        })
        .transpose()
}

async fn existing_category(db: &MongoConfig, raw: &str) -> ApiResult<ObjectId> {
    let category_id = parse_id(raw, "category")?;
    db.collection::<Category>(collections::CATEGORIES)
        .find_one(doc! { "_id": category_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Category"))?;
    Ok(category_id)
}

async fn find_many(db: &MongoConfig, filter: Document) -> ApiResult<Vec<Service>> {
    Ok(services(db)
        .find(filter, newest_first())
        .await?
        .try_collect()
        .await?)
}

fn list_response(list: Vec<Service>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "count": list.len(),
        "data": list,
    }))
}

pub async fn list_services(
    db: web::Data<MongoConfig>,
    query: web::Query<ServiceQuery>,
) -> ApiResult<HttpResponse> {
    debug!("Fetching services: {:?}", query);

    let list = find_many(&db, list_filter(&query)?).await?;

    info!("Retrieved {} services", list.len());
    Ok(list_response(list))
}

pub async fn search_services(
    db: web::Data<MongoConfig>,
    query: web::Query<SearchQuery>,
) -> ApiResult<HttpResponse> {
    let term = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("Search query is required".into()))?;

    debug!("Searching services for '{}'", term);
    let list = find_many(&db, search_filter(term)).await?;
    Ok(list_response(list))
}

pub async fn services_by_category(
    db: web::Data<MongoConfig>,
    category_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let category_id = parse_id(&category_id, "category")?;
    debug!("Fetching services in category {}", category_id);

    let list = find_many(&db, doc! { "category": category_id }).await?;
    Ok(list_response(list))
}

pub async fn get_service(
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let service_id = parse_id(&id, "service")?;
    debug!("Fetching service with ID: {}", service_id);

    let service = services(&db)
        .find_one(doc! { "_id": service_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Service"))?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": service })))
}

pub async fn create_service(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    images: web::Data<ImageKit>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let mut form = FormData::read(payload, "image").await?;
    let request: CreateServiceRequest = json_part(&form)?
        .ok_or_else(|| ApiError::InvalidArgument("Service data is required".into()))?;
    request.validate()?;

    debug!("Creating service: {}", request.name);
    let category = existing_category(&db, &request.category).await?;

    let image_url = match form.file.take() {
        Some(file) => Some(file.store(&images, "service", IMAGE_FOLDER).await?),
        None => None,
    };

    let mut service = Service::new(request, category, image_url);
    let result = services(&db).insert_one(&service, None).await?;
    service.id = result.inserted_id.as_object_id();

    info!("Service created successfully with ID: {}", result.inserted_id);
    Ok(HttpResponse::Created().json(json!({ "success": true, "data": service })))
}

pub async fn update_service(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    images: web::Data<ImageKit>,
    id: web::Path<String>,
    payload: Multipart,
) -> ApiResult<HttpResponse> {
    let service_id = parse_id(&id, "service")?;
    let mut form = FormData::read(payload, "image").await?;
    let update: UpdateServiceRequest = json_part(&form)?.unwrap_or_default();
    update.validate()?;

    debug!("Updating service {}: {:?}", service_id, update);

    let category = match &update.category {
        Some(raw) => Some(existing_category(&db, raw).await?),
        None => None,
    };
    let image_url = match form.file.take() {
        Some(file) => Some(file.store(&images, "service", IMAGE_FOLDER).await?),
        None => None,
    };
    let set = update.to_set_document(category, image_url)?;

    let collection = services(&db);
    let result = collection
        .update_one(doc! { "_id": service_id }, doc! { "$set": set }, None)
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("Service"));
    }

    let service = collection.find_one(doc! { "_id": service_id }, None).await?;
    info!("Service updated successfully: {}", service_id);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": service })))
}

/// Hard delete. Carts and bookings that reference the service keep their
/// own copies of what was priced.
pub async fn delete_service(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let service_id = parse_id(&id, "service")?;
    debug!("Deleting service: {}", service_id);

    let result = services(&db)
        .delete_one(doc! { "_id": service_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Service"));
    }

    info!("Service deleted successfully: {}", service_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Service deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_term_is_escaped_and_case_insensitive() {
        let filter = search_filter("a+b (spa)");
        let branches = filter.get_array("$or").unwrap();
        let name = branches[0].as_document().unwrap().get("name").unwrap();
        match name {
            mongodb::bson::Bson::RegularExpression(re) => {
                assert_eq!(re.pattern, r"a\+b \(spa\)");
                assert_eq!(re.options, "i");
            }
            other => panic!("expected a regex, got {:?}", other),
        }
    }

    #[test]
    fn list_filter_only_includes_given_fields() {
        let category = ObjectId::new();
        let query = ServiceQuery {
            category: Some(category.to_hex()),
            popular: Some(true),
            active: None,
        };
        let filter = list_filter(&query).unwrap();
        assert_eq!(filter.get_object_id("category").unwrap(), category);
        assert!(filter.get_bool("isPopular").unwrap());
        assert!(!filter.contains_key("isActive"));

        let bad = ServiceQuery {
            category: Some("nope".into()),
            popular: None,
            active: None,
        };
        assert!(list_filter(&bad).is_err());
    }

    #[test]
    fn data_part_is_parsed_as_json() {
        let mut form = FormData::default();
        form.fields.insert("data".into(), r#"{"price": 650, "isPopular": true}"#.into());
        let update: UpdateServiceRequest = json_part(&form).unwrap().unwrap();
        assert_eq!(update.price, Some(650.0));
        assert_eq!(update.is_popular, Some(true));

        form.fields.insert("data".into(), "{not json".into());
        assert!(json_part::<UpdateServiceRequest>(&form).is_err());
    }
}
