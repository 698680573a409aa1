use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection,
};
use serde_json::json;
use tracing::{debug, info};
use validator::Validate;

use crate::auth::AdminUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::models::{
    beautician::{CreateBeauticianRequest, UpdateBeauticianRequest},
    collections, Beautician,
};

fn beauticians(db: &MongoConfig) -> Collection<Beautician> {
    db.collection(collections::BEAUTICIANS)
}

pub async fn create_beautician(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    body: web::Json<CreateBeauticianRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let request = body.into_inner();
    debug!("Creating beautician {}", request.name);

    let collection = beauticians(&db);
    if collection
        .find_one(doc! { "phone": request.phone.as_str() }, None)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "Beautician with this phone already exists".into(),
        ));
    }

    let services = request
        .services
        .iter()
        .map(|raw| parse_id(raw, "service"))
        .collect::<ApiResult<Vec<_>>>()?;

    let mut beautician = Beautician::new(request, services);
    let result = collection.insert_one(&beautician, None).await?;
    beautician.id = result.inserted_id.as_object_id();

    info!("Beautician created successfully with ID: {}", result.inserted_id);
    Ok(HttpResponse::Created().json(json!({ "success": true, "data": beautician })))
}

pub async fn list_beauticians(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
) -> ApiResult<HttpResponse> {
    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    let list: Vec<Beautician> = beauticians(&db)
        .find(None, options)
        .await?
        .try_collect()
        .await?;

    info!("Retrieved {} beauticians", list.len());
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": list.len(),
        "data": list,
    })))
}

pub async fn get_beautician(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let beautician_id = parse_id(&id, "beautician")?;

    let beautician = beauticians(&db)
        .find_one(doc! { "_id": beautician_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Beautician"))?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": beautician })))
}

pub async fn update_beautician(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
    body: web::Json<UpdateBeauticianRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let beautician_id = parse_id(&id, "beautician")?;
    debug!("Updating beautician {}", beautician_id);

    let services = body
        .services
        .as_ref()
        .map(|raw| {
            raw.iter()
                .map(|s| parse_id(s, "service"))
                .collect::<ApiResult<Vec<_>>>()
        })
        .transpose()?;

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let updated = beauticians(&db)
        .find_one_and_update(
            doc! { "_id": beautician_id },
            doc! { "$set": body.to_set_document(services) },
            options,
        )
        .await
        .map_err(|e| match ApiError::from(e) {
            e if e.is_duplicate_key() => {
                ApiError::Conflict("Beautician with this phone already exists".into())
            }
            e => e,
        })?
        .ok_or_else(|| ApiError::not_found("Beautician"))?;

    info!("Beautician updated successfully: {}", beautician_id);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": updated })))
}

pub async fn toggle_active(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let beautician_id = parse_id(&id, "beautician")?;
    debug!("Toggling availability of beautician {}", beautician_id);

    // Pipeline update: flips the stored flag in place.
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let beautician = beauticians(&db)
        .find_one_and_update(
            doc! { "_id": beautician_id },
            vec![doc! {
                "$set": {
                    "isActive": { "$not": ["$isActive"] },
                    "updatedAt": DateTime::now(),
                }
            }],
            options,
        )
        .await?
        .ok_or_else(|| ApiError::not_found("Beautician"))?;

    info!("Beautician {} is now active: {}", beautician_id, beautician.is_active);
    Ok(HttpResponse::Ok().json(json!({ "success": true, "data": beautician })))
}

pub async fn delete_beautician(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let beautician_id = parse_id(&id, "beautician")?;

    let result = beauticians(&db)
        .delete_one(doc! { "_id": beautician_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Beautician"));
    }

    info!("Beautician deleted successfully: {}", beautician_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Beautician deleted successfully",
    })))
}
