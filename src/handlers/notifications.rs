use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime},
    options::FindOptions,
    Collection,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::auth::AuthUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::models::{collections, Notification};

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    /// One-based page and a bounded page size.
    fn window(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (page, limit)
    }
}

fn notifications(db: &MongoConfig) -> Collection<Notification> {
    db.collection(collections::NOTIFICATIONS)
}

pub async fn list_notifications(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let (page, limit) = query.window();
    debug!("Fetching notifications of {} (page {}, limit {})", user.id, page, limit);

    let collection = notifications(&db);
    let options = FindOptions::builder()
        .sort(doc! { "createdAt": -1 })
        .skip((page - 1) * limit)
        .limit(limit as i64)
        .build();

    let list: Vec<Notification> = collection
        .find(doc! { "user": user.id }, options)
        .await?
        .try_collect()
        .await?;
    let total = collection.count_documents(doc! { "user": user.id }, None).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": list.len(),
        "total": total,
        "page": page,
        "notifications": list,
    })))
}

pub async fn unread_count(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let count = notifications(&db)
        .count_documents(doc! { "user": user.id, "isRead": false }, None)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "count": count })))
}

pub async fn mark_read(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let notification_id = parse_id(&id, "notification")?;
    debug!("Marking notification {} read for {}", notification_id, user.id);

    let result = notifications(&db)
        .update_one(
            doc! { "_id": notification_id, "user": user.id },
            doc! { "$set": { "isRead": true, "updatedAt": DateTime::now() } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(ApiError::not_found("Notification"));
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Notification marked as read",
    })))
}

pub async fn mark_all_read(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let result = notifications(&db)
        .update_many(
            doc! { "user": user.id, "isRead": false },
            doc! { "$set": { "isRead": true, "updatedAt": DateTime::now() } },
            None,
        )
        .await?;

    info!("Marked {} notifications read for {}", result.modified_count, user.id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "All notifications marked as read",
        "updated": result.modified_count,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_is_bounded() {
        let q = PageQuery { page: None, limit: None };
        assert_eq!(q.window(), (1, DEFAULT_LIMIT));

        let q = PageQuery { page: Some(0), limit: Some(10_000) };
        assert_eq!(q.window(), (1, MAX_LIMIT));

        let q = PageQuery { page: Some(3), limit: Some(0) };
        assert_eq!(q.window(), (3, 1));
    }
}
