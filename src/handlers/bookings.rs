use std::collections::HashMap;

use actix_web::{http::header, web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime, Document},
    options::FindOptions,
    ClientSession, Collection,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{replace_if_unchanged, version_filter, MAX_WRITE_ATTEMPTS};
use crate::auth::{AdminUser, AuthUser};
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::models::{
    booking::{checkout, AssignBeauticianRequest, CreateBookingRequest, UpdateBookingStatusRequest},
    collections, Beautician, Booking, BookingStatus, Cart, PaymentStatus, Service,
};
use crate::notifier::Notifier;

#[derive(Debug, Deserialize)]
pub struct MineQuery {
    pub status: Option<BookingStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminQuery {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
}

fn bookings(db: &MongoConfig) -> Collection<Booking> {
    db.collection(collections::BOOKINGS)
}

fn newest_first() -> FindOptions {
    FindOptions::builder().sort(doc! { "createdAt": -1 }).build()
}

fn status_filter(mut filter: Document, status: Option<BookingStatus>) -> Document {
    if let Some(status) = status {
        filter.insert("status", status.filter_value());
    }
    filter
}

async fn find_bookings(db: &MongoConfig, filter: Document) -> ApiResult<Vec<Booking>> {
    Ok(bookings(db)
        .find(filter, newest_first())
        .await?
        .try_collect()
        .await?)
}

/// Loads a booking, lets `change` mutate it and writes it back with a
/// version check, retrying on lost races. `scope` narrows the lookup,
/// e.g. to the caller's own bookings.
pub(crate) async fn modify_booking<F>(
    db: &MongoConfig,
    id: ObjectId,
    scope: Document,
    mut change: F,
) -> ApiResult<Booking>
where
    F: FnMut(&mut Booking) -> ApiResult<()>,
{
    let collection = bookings(db);
    let mut filter = scope;
    filter.insert("_id", id);

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let mut booking = collection
            .find_one(filter.clone(), None)
            .await?
            .ok_or_else(|| ApiError::not_found("Booking"))?;
        change(&mut booking)?;

        let expected = booking.version;
        booking.version += 1;
        if replace_if_unchanged(&collection, id, expected, &booking).await? {
            return Ok(booking);
        }
        debug!("Booking {} changed concurrently (attempt {})", id, attempt);
    }

    warn!("Giving up on booking write for {} after {} attempts", id, MAX_WRITE_ATTEMPTS);
    Err(ApiError::Conflict(
        "Booking was modified concurrently, please retry".into(),
    ))
}

/// Snapshot the cart, insert the booking and empty the cart as one
/// transaction.
async fn checkout_cart(
    db: &MongoConfig,
    session: &mut ClientSession,
    user: ObjectId,
    request: &CreateBookingRequest,
) -> ApiResult<Booking> {
    let carts: Collection<Cart> = db.collection(collections::CARTS);
    let services: Collection<Service> = db.collection(collections::SERVICES);

    let cart = carts
        .find_one_with_session(doc! { "user": user }, None, session)
        .await?
        .filter(|cart| !cart.is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("Cart is empty".into()))?;
    let cart_id = cart
        .id
        .ok_or_else(|| ApiError::Internal("cart loaded without an id".into()))?;

    let ids: Vec<ObjectId> = cart.items.iter().map(|item| item.service).collect();
    let mut cursor = services
        .find_with_session(doc! { "_id": { "$in": ids } }, None, session)
        .await?;
    let found: Vec<Service> = cursor.stream(session).try_collect().await?;
    let catalog: HashMap<ObjectId, Service> = found
        .into_iter()
        .filter_map(|s| s.id.map(|id| (id, s)))
        .collect();

    let (mut booking, emptied) = checkout(&cart, &catalog, request.checkout())?;
    let result = bookings(db)
        .insert_one_with_session(&booking, None, session)
        .await?;
    booking.id = result.inserted_id.as_object_id();

    let cleared = carts
        .replace_one_with_session(version_filter(cart_id, cart.version), &emptied, None, session)
        .await?;
    if cleared.matched_count == 0 {
        return Err(ApiError::Conflict(
            "Cart changed during checkout, please retry".into(),
        ));
    }

    Ok(booking)
}

async fn create_from_cart(
    db: &MongoConfig,
    user: ObjectId,
    request: &CreateBookingRequest,
) -> ApiResult<Booking> {
    let mut session = db.client.start_session(None).await?;
    session.start_transaction(None).await?;

    match checkout_cart(db, &mut session, user, request).await {
        Ok(booking) => {
            session.commit_transaction().await?;
            Ok(booking)
        }
        Err(e) => {
            if let Err(abort) = session.abort_transaction().await {
                error!("Failed to abort checkout transaction: {}", abort);
            }
            Err(e)
        }
    }
}

async fn create_from_selection(
    db: &MongoConfig,
    user: ObjectId,
    request: &CreateBookingRequest,
) -> ApiResult<Booking> {
    let selected = request.services.as_deref().unwrap_or_default();
    for item in selected {
        item.validate()?;
    }

    let ids = selected
        .iter()
        .map(|item| parse_id(&item.service_id, "service"))
        .collect::<ApiResult<Vec<_>>>()?;
    let found: Vec<Service> = db
        .collection::<Service>(collections::SERVICES)
        .find(doc! { "_id": { "$in": ids.clone() } }, None)
        .await?
        .try_collect()
        .await?;

    let selection = ids
        .iter()
        .zip(selected)
        .map(|(id, item)| {
            let service = found
                .iter()
                .find(|s| s.id.as_ref() == Some(id))
                .ok_or_else(|| ApiError::not_found("Service"))?;
            Ok((service, item.addons.clone(), item.quantity))
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let mut booking = Booking::from_selection(user, selection, request.checkout())?;
    let result = bookings(db).insert_one(&booking, None).await?;
    booking.id = result.inserted_id.as_object_id();
    Ok(booking)
}

pub async fn create_booking(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    notifier: web::Data<Notifier>,
    body: web::Json<CreateBookingRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    debug!("Creating booking for {} ({})", user.id, body.payment_method.as_str());

    let booking = match &body.services {
        Some(_) => create_from_selection(&db, user.id, &body).await?,
        None => create_from_cart(&db, user.id, &body).await?,
    };

    info!(
        "Booking {:?} created for {} totalling {}",
        booking.id, user.id, booking.amount
    );
    notifier
        .booking(
            &booking,
            "Booking Confirmed",
            "Your booking has been placed successfully.",
        )
        .await;

    Ok(HttpResponse::Created().json(json!({ "success": true, "booking": booking })))
}

fn list_response(list: Vec<Booking>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "count": list.len(),
        "bookings": list,
    }))
}

async fn mine(db: &MongoConfig, user: ObjectId, status: Option<BookingStatus>) -> ApiResult<HttpResponse> {
    debug!("Fetching bookings of {} (status {:?})", user, status);
    let list = find_bookings(db, status_filter(doc! { "user": user }, status)).await?;
    Ok(list_response(list))
}

pub async fn my_bookings(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    query: web::Query<MineQuery>,
) -> ApiResult<HttpResponse> {
    mine(&db, user.id, query.status).await
}

pub async fn my_pending(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    mine(&db, user.id, Some(BookingStatus::Pending)).await
}

pub async fn my_completed(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    mine(&db, user.id, Some(BookingStatus::Completed)).await
}

pub async fn my_cancelled(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    mine(&db, user.id, Some(BookingStatus::Cancelled)).await
}

pub async fn get_booking(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let booking_id = parse_id(&id, "booking")?;
    debug!("Fetching booking {} for {}", booking_id, user.id);

    let booking = bookings(&db)
        .find_one(doc! { "_id": booking_id, "user": user.id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Booking"))?;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "booking": booking })))
}

pub async fn cancel_booking(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    notifier: web::Data<Notifier>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let booking_id = parse_id(&id, "booking")?;
    debug!("Cancelling booking {} for {}", booking_id, user.id);

    let booking = modify_booking(&db, booking_id, doc! { "user": user.id }, Booking::cancel).await?;

    info!("Booking cancelled: {}", booking_id);
    notifier
        .booking(&booking, "Booking Cancelled", "Your booking has been cancelled.")
        .await;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Booking cancelled successfully",
        "booking": booking,
    })))
}

pub async fn admin_list(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    query: web::Query<AdminQuery>,
) -> ApiResult<HttpResponse> {
    debug!("Admin booking listing: {:?}", query);

    let mut filter = status_filter(doc! {}, query.status);
    if let Some(payment_status) = query.payment_status {
        filter.insert("paymentStatus", payment_status.as_str());
    }

    let list = find_bookings(&db, filter).await?;
    info!("Retrieved {} bookings", list.len());
    Ok(list_response(list))
}

pub async fn admin_update_status(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    notifier: web::Data<Notifier>,
    id: web::Path<String>,
    body: web::Json<UpdateBookingStatusRequest>,
) -> ApiResult<HttpResponse> {
    let booking_id = parse_id(&id, "booking")?;
    if body.status.is_none() && body.payment_status.is_none() {
        return Err(ApiError::InvalidArgument(
            "Provide status or paymentStatus".into(),
        ));
    }
    debug!("Admin update of booking {}: {:?}", booking_id, body);

    let mut status_changed = false;
    let booking = modify_booking(&db, booking_id, doc! {}, |booking| {
        status_changed = booking.apply_admin_update(body.status, body.payment_status);
        Ok(())
    })
    .await?;

    info!("Booking {} updated to {}/{}", booking_id, booking.status, booking.payment_status.as_str());
    if status_changed {
        notifier
            .booking(
                &booking,
                "Booking Update",
                &format!("Your booking status has been updated to {}.", booking.status),
            )
            .await;
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true, "booking": booking })))
}

pub async fn admin_assign(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    notifier: web::Data<Notifier>,
    id: web::Path<String>,
    body: web::Json<AssignBeauticianRequest>,
) -> ApiResult<HttpResponse> {
    let booking_id = parse_id(&id, "booking")?;
    let beautician_id = parse_id(&body.beautician_id, "beautician")?;
    debug!("Assigning beautician {} to booking {}", beautician_id, booking_id);

    let beauticians: Collection<Beautician> = db.collection(collections::BEAUTICIANS);
    let beautician = beauticians
        .find_one(doc! { "_id": beautician_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Beautician"))?;
    if !beautician.is_active {
        return Err(ApiError::InvalidState("Beautician is not active".into()));
    }

    let booking = modify_booking(&db, booking_id, doc! {}, |booking| booking.assign(beautician_id)).await?;

    beauticians
        .update_one(
            doc! { "_id": beautician_id },
            doc! { "$addToSet": { "bookings": booking_id }, "$set": { "updatedAt": DateTime::now() } },
            None,
        )
        .await?;

    info!("Beautician {} assigned to booking {}", beautician_id, booking_id);
    notifier
        .booking(
            &booking,
            "Beautician Assigned",
            &format!("{} has been assigned to your booking.", beautician.name),
        )
        .await;

    Ok(HttpResponse::Ok().json(json!({ "success": true, "booking": booking })))
}

pub async fn admin_delete(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let booking_id = parse_id(&id, "booking")?;
    debug!("Deleting booking: {}", booking_id);

    let result = bookings(&db)
        .delete_one(doc! { "_id": booking_id }, None)
        .await?;
    if result.deleted_count == 0 {
        return Err(ApiError::not_found("Booking"));
    }

    info!("Booking deleted successfully: {}", booking_id);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Booking deleted successfully",
    })))
}

const CSV_HEADER: [&str; 12] = [
    "bookingId",
    "userId",
    "phoneNumber",
    "city",
    "services",
    "amount",
    "totalGst",
    "paymentMethod",
    "paymentStatus",
    "status",
    "scheduledAt",
    "createdAt",
];

fn bookings_csv(list: &[Booking]) -> ApiResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let csv_error = |e: csv::Error| ApiError::Internal(format!("CSV export failed: {}", e));

    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for booking in list {
        let services: usize = booking.services.iter().map(|l| l.quantity as usize).sum();
        writer
            .write_record([
                booking.id.map(|id| id.to_hex()).unwrap_or_default(),
                booking.user.to_hex(),
                booking.phone_number.clone(),
                booking.address.city.clone().unwrap_or_default(),
                services.to_string(),
                format!("{:.2}", booking.amount),
                format!("{:.2}", booking.total_gst),
                booking.payment_method.as_str().to_string(),
                booking.payment_status.as_str().to_string(),
                booking.status.as_str().to_string(),
                booking.scheduled_at.try_to_rfc3339_string().unwrap_or_default(),
                booking.created_at.try_to_rfc3339_string().unwrap_or_default(),
            ])
            .map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| ApiError::Internal(format!("CSV export failed: {}", e)))
}

pub async fn admin_export(
    _admin: AdminUser,
    db: web::Data<MongoConfig>,
    query: web::Query<AdminQuery>,
) -> ApiResult<HttpResponse> {
    let mut filter = status_filter(doc! {}, query.status);
    if let Some(payment_status) = query.payment_status {
        filter.insert("paymentStatus", payment_status.as_str());
    }

    let list = find_bookings(&db, filter).await?;
    let body = bookings_csv(&list)?;

    info!("Exported {} bookings", list.len());
    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"bookings.csv\"",
        ))
        .body(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        booking::{Address, Checkout},
        PaymentMethod,
    };

    fn booking() -> Booking {
        let now = DateTime::now();
        let service = Service {
            id: Some(ObjectId::new()),
            name: "Threading".into(),
            description: "Eyebrows".into(),
            price: 80.0,
            gst_amount: None,
            duration: 15,
            category: ObjectId::new(),
            image_url: None,
            is_included: Vec::new(),
            is_popular: false,
            is_active: true,
            addons: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let mut b = Booking::from_selection(
            ObjectId::new(),
            vec![(&service, vec![], 2)],
            Checkout {
                address: Address {
                    city: Some("Mumbai, West".into()),
                    ..Default::default()
                },
                phone_number: "9123456789".into(),
                payment_method: PaymentMethod::Cod,
                scheduled_at: now,
            },
        )
        .unwrap();
        b.id = Some(ObjectId::new());
        b
    }

    #[test]
    fn status_filter_includes_legacy_spellings() {
        let filter = status_filter(doc! { "user": ObjectId::new() }, Some(BookingStatus::Assigned));
        let spellings = filter.get_document("status").unwrap().get_array("$in").unwrap();
        assert_eq!(spellings.len(), 2);
        assert!(filter.contains_key("user"));

        assert!(!status_filter(doc! {}, None).contains_key("status"));
    }

    #[test]
    fn csv_export_has_header_and_one_row_per_booking() {
        let b = booking();
        let bytes = bookings_csv(&[b.clone()]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), CSV_HEADER.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with(&b.id.unwrap().to_hex()));
        assert!(row.contains("\"Mumbai, West\""));
        assert!(row.contains(",160.00,"));
        assert!(row.contains(",COD,pending,pending,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn admin_query_reads_camel_case() {
        let query =
            web::Query::<AdminQuery>::from_query("status=confirmed&paymentStatus=paid").unwrap();
        assert_eq!(query.status, Some(BookingStatus::Assigned));
        assert_eq!(query.payment_status, Some(PaymentStatus::Paid));
    }
}
