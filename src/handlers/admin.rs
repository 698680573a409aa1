use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, DateTime, Document},
    options::FindOptions,
    Collection,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use validator::Validate;

use super::users::{complete_login, ensure_not_blocked, insert_user, users};
use crate::auth::{hash_password, verify_password, AdminUser};
use crate::config::{MongoConfig, Settings};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    collections,
    user::{AdminLoginRequest, AdminSignupRequest},
    Beautician, Booking, BookingStatus, PaymentStatus, Role, Service, User, UserProfile,
};

const REVENUE_DAYS: i64 = 7;
const RECENT_BOOKINGS: i64 = 5;

pub async fn signup(
    db: web::Data<MongoConfig>,
    settings: web::Data<Settings>,
    body: web::Json<AdminSignupRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let request = body.into_inner();

    if request.admin_secret_key != settings.admin_secret_key {
        warn!("Admin signup with a wrong secret key for {}", request.email);
        return Err(ApiError::Forbidden("Invalid admin secret key".into()));
    }

    let email = request.email.trim().to_lowercase();
    if users(&db)
        .find_one(doc! { "email": email.as_str() }, None)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Admin already exists".into()));
    }

    let mut admin = User::new(request.phone, request.name, Some(email), Role::Admin);
    admin.password_hash = Some(hash_password(&request.password)?);
    let id = insert_user(&db, &mut admin).await?;

    info!("Admin registered with ID: {}", id);
    let response = complete_login(&db, &settings, &admin).await?;
    Ok(HttpResponse::Created().json(response))
}

pub async fn login(
    db: web::Data<MongoConfig>,
    settings: web::Data<Settings>,
    body: web::Json<AdminLoginRequest>,
) -> ApiResult<HttpResponse> {
    let email = body.email.trim().to_lowercase();
    debug!("Admin login attempt for {}", email);
    let invalid = || ApiError::Unauthorized("Invalid credentials".into());

    let admin = users(&db)
        .find_one(doc! { "email": email.as_str(), "role": Role::Admin.as_str() }, None)
        .await?
        .ok_or_else(invalid)?;
    let hash = admin.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(&body.password, hash)? {
        return Err(invalid());
    }
    ensure_not_blocked(&admin)?;

    let response = complete_login(&db, &settings, &admin).await?;
    info!("Admin {:?} logged in", admin.id);
    Ok(HttpResponse::Ok().json(response))
}

pub async fn list_users(_admin: AdminUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();
    let list: Vec<User> = users(&db)
        .find(doc! { "role": Role::User.as_str() }, options)
        .await?
        .try_collect()
        .await?;
    let profiles: Vec<UserProfile> = list.iter().map(UserProfile::from).collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": profiles.len(),
        "data": profiles,
    })))
}

/// Numeric aggregation output may come back as any BSON number type.
fn number(doc: &Document, key: &str) -> f64 {
    match doc.get(key) {
        Some(Bson::Int32(n)) => f64::from(*n),
        Some(Bson::Int64(n)) => *n as f64,
        Some(Bson::Double(n)) => *n,
        _ => 0.0,
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: BookingStatus,
    pub count: i64,
}

/// Folds `{_id: status, count}` groups onto the canonical statuses, so a
/// legacy spelling counts toward its current name.
fn fold_status_counts(rows: &[Document]) -> Vec<StatusCount> {
    let mut counts = BookingStatus::ALL.map(|status| StatusCount { status, count: 0 });

    for row in rows {
        let Some(raw) = row.get_str("_id").ok() else { continue };
        match serde_json::from_value::<BookingStatus>(json!(raw)) {
            Ok(status) => {
                if let Some(slot) = counts.iter_mut().find(|c| c.status == status) {
                    slot.count += number(row, "count") as i64;
                }
            }
            Err(_) => warn!("Ignoring bookings with unknown status {}", raw),
        }
    }

    counts.into_iter().collect()
}

#[derive(Debug, PartialEq, Serialize)]
pub struct RevenueDay {
    pub date: String,
    pub revenue: f64,
    pub count: i64,
}

fn revenue_days(rows: &[Document]) -> Vec<RevenueDay> {
    rows.iter()
        .filter_map(|row| {
            Some(RevenueDay {
                date: row.get_str("_id").ok()?.to_string(),
                revenue: number(row, "revenue"),
                count: number(row, "count") as i64,
            })
        })
        .collect()
}

async fn aggregate_rows(collection: &Collection<Booking>, pipeline: Vec<Document>) -> ApiResult<Vec<Document>> {
    Ok(collection.aggregate(pipeline, None).await?.try_collect().await?)
}

pub async fn overview(_admin: AdminUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let bookings: Collection<Booking> = db.collection(collections::BOOKINGS);

    let total_bookings = bookings.count_documents(None, None).await?;
    let total_users = users(&db)
        .count_documents(doc! { "role": Role::User.as_str() }, None)
        .await?;
    let total_beauticians = db
        .collection::<Beautician>(collections::BEAUTICIANS)
        .count_documents(None, None)
        .await?;
    let total_services = db
        .collection::<Service>(collections::SERVICES)
        .count_documents(None, None)
        .await?;

    let revenue = aggregate_rows(
        &bookings,
        vec![
            doc! { "$match": { "paymentStatus": PaymentStatus::Paid.as_str() } },
            doc! { "$group": { "_id": Bson::Null, "totalRevenue": { "$sum": "$amount" } } },
        ],
    )
    .await?;
    let total_revenue = revenue.first().map(|r| number(r, "totalRevenue")).unwrap_or(0.0);

    let options = FindOptions::builder()
        .sort(doc! { "createdAt": -1 })
        .limit(RECENT_BOOKINGS)
        .build();
    let recent: Vec<Booking> = bookings.find(None, options).await?.try_collect().await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": {
            "stats": {
                "totalBookings": total_bookings,
                "totalUsers": total_users,
                "totalBeauticians": total_beauticians,
                "totalServices": total_services,
                "totalRevenue": total_revenue,
            },
            "recentBookings": recent,
        },
    })))
}

pub async fn booking_stats(_admin: AdminUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let bookings: Collection<Booking> = db.collection(collections::BOOKINGS);
    let rows = aggregate_rows(
        &bookings,
        vec![doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } }],
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": fold_status_counts(&rows),
    })))
}

pub async fn revenue_stats(_admin: AdminUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    let bookings: Collection<Booking> = db.collection(collections::BOOKINGS);
    let since = DateTime::from_millis(
        DateTime::now().timestamp_millis() - REVENUE_DAYS * 24 * 60 * 60 * 1000,
    );

    let rows = aggregate_rows(
        &bookings,
        vec![
            doc! { "$match": {
                "paymentStatus": PaymentStatus::Paid.as_str(),
                "createdAt": { "$gte": since },
            } },
            doc! { "$group": {
                "_id": { "$dateToString": { "format": "%Y-%m-%d", "date": "$createdAt" } },
                "revenue": { "$sum": "$amount" },
                "count": { "$sum": 1 },
            } },
            doc! { "$sort": { "_id": 1 } },
        ],
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": revenue_days(&rows),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_status_groups_fold_into_canonical_ones() {
        let rows = vec![
            doc! { "_id": "pending", "count": 4_i32 },
            doc! { "_id": "assigned", "count": 2_i32 },
            doc! { "_id": "confirmed", "count": 3_i64 },
            doc! { "_id": "mystery", "count": 9_i32 },
        ];
        let folded = fold_status_counts(&rows);

        assert_eq!(folded.len(), BookingStatus::ALL.len());
        let count_of = |s: BookingStatus| folded.iter().find(|c| c.status == s).unwrap().count;
        assert_eq!(count_of(BookingStatus::Pending), 4);
        assert_eq!(count_of(BookingStatus::Assigned), 5);
        assert_eq!(count_of(BookingStatus::Cancelled), 0);
    }

    #[test]
    fn revenue_rows_accept_any_number_type() {
        let rows = vec![
            doc! { "_id": "2024-03-01", "revenue": 1500.5, "count": 2_i32 },
            doc! { "_id": "2024-03-02", "revenue": 800_i64, "count": 1_i64 },
            doc! { "_id": Bson::Null, "revenue": 1.0, "count": 1_i32 },
        ];
        let days = revenue_days(&rows);

        assert_eq!(days.len(), 2);
        assert_eq!(days[0], RevenueDay { date: "2024-03-01".into(), revenue: 1500.5, count: 2 });
        assert_eq!(days[1].revenue, 800.0);
    }
}
