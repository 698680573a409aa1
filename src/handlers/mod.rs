pub mod admin;
pub mod beauticians;
pub mod bookings;
pub mod cart;
pub mod categories;
pub mod favourites;
pub mod notifications;
pub mod offers;
pub mod otp;
pub mod payments;
pub mod referrals;
pub mod services;
pub mod users;

use actix_web::web;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, Document},
    Collection,
};
use serde::Serialize;

use crate::auth::AuthMiddleware;
use crate::error::ApiResult;

/// Attempts per optimistic write before giving up with a conflict.
pub const MAX_WRITE_ATTEMPTS: usize = 5;

/// Matches the stored version. Documents written before versioning
/// carry no field at all and count as version 0.
pub fn version_filter(id: ObjectId, expected: i64) -> Document {
    let version = if expected == 0 {
        Bson::Document(doc! { "$in": [0_i64, Bson::Null] })
    } else {
        Bson::Int64(expected)
    };
    doc! { "_id": id, "version": version }
}

/// Replaces the document only if nobody else wrote it since it was read.
/// Returns false when the compare-and-set lost.
pub async fn replace_if_unchanged<T>(
    collection: &Collection<T>,
    id: ObjectId,
    expected_version: i64,
    replacement: &T,
) -> ApiResult<bool>
where
    T: Serialize,
{
    let result = collection
        .replace_one(version_filter(id, expected_version), replacement, None)
        .await?;
    Ok(result.matched_count == 1)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/categories")
            .route("", web::get().to(categories::list_categories))
            .route("", web::post().to(categories::create_category))
            .route("/{id}", web::get().to(categories::get_category))
            .route("/{id}", web::put().to(categories::update_category))
            .route("/{id}", web::delete().to(categories::delete_category)),
    )
    .service(
        web::scope("/api/services")
            .route("", web::get().to(services::list_services))
            .route("", web::post().to(services::create_service))
            .route("/search", web::get().to(services::search_services))
            .route("/category/{category_id}", web::get().to(services::services_by_category))
            .route("/{id}", web::get().to(services::get_service))
            .route("/{id}", web::put().to(services::update_service))
            .route("/{id}", web::delete().to(services::delete_service)),
    )
    .service(
        web::scope("/api/offers")
            .route("", web::get().to(offers::list_offers))
            .route("", web::post().to(offers::create_offer))
            .route("/active", web::get().to(offers::active_offers))
            .route("/{id}", web::put().to(offers::update_offer))
            .route("/{id}", web::delete().to(offers::delete_offer)),
    )
    .service(
        web::scope("/api/cart")
            .wrap(AuthMiddleware)
            .route("", web::get().to(cart::get_cart))
            .route("/items", web::post().to(cart::add_item))
            .route("/items/{item_id}", web::put().to(cart::update_quantity))
            .route("/items/{item_id}", web::delete().to(cart::remove_item)),
    )
    .service(
        web::scope("/api/bookings")
            .wrap(AuthMiddleware)
            .route("", web::post().to(bookings::create_booking))
            .route("/mine", web::get().to(bookings::my_bookings))
            .route("/mine/pending", web::get().to(bookings::my_pending))
            .route("/mine/completed", web::get().to(bookings::my_completed))
            .route("/mine/cancelled", web::get().to(bookings::my_cancelled))
            .route("/{id}", web::get().to(bookings::get_booking))
            .route("/{id}/cancel", web::put().to(bookings::cancel_booking)),
    )
    .service(
        web::scope("/api/payments")
            .wrap(AuthMiddleware)
            .route("/create-order", web::post().to(payments::create_order))
            .route("/verify", web::post().to(payments::verify_payment))
            .route("/transactions", web::get().to(payments::transactions)),
    )
    .service(
        web::scope("/api/notifications")
            .wrap(AuthMiddleware)
            .route("", web::get().to(notifications::list_notifications))
            .route("/unread-count", web::get().to(notifications::unread_count))
            .route("/read-all", web::patch().to(notifications::mark_all_read))
            .route("/{id}/read", web::patch().to(notifications::mark_read)),
    )
    .service(
        web::scope("/api/users")
            .route("/register", web::post().to(users::register))
            .route("/login", web::post().to(users::login))
            .route("/profile", web::get().to(users::get_profile))
            .route("/profile", web::put().to(users::update_profile))
            .route("/fcm-token", web::put().to(users::save_fcm_token)),
    )
    .service(
        web::scope("/api/otp")
            .route("/check-phone/{phone}", web::get().to(otp::check_phone))
            .route("/login", web::post().to(otp::login_with_otp))
            .route("/reset-password", web::post().to(otp::reset_password)),
    )
    .service(
        web::scope("/api/referrals")
            .wrap(AuthMiddleware)
            .route("/generate", web::post().to(referrals::generate_code))
            .route("/my-code", web::get().to(referrals::my_code))
            .route("/apply", web::post().to(referrals::apply_code)),
    )
    .service(
        web::scope("/api/favourites")
            .wrap(AuthMiddleware)
            .route("", web::get().to(favourites::list_favourites))
            .route("", web::post().to(favourites::add_favourite))
            .route("/{service_id}", web::delete().to(favourites::remove_favourite)),
    )
    .service(
        web::scope("/api/admin")
            .route("/signup", web::post().to(admin::signup))
            .route("/login", web::post().to(admin::login))
            .route("/users", web::get().to(admin::list_users))
            .route("/analytics/overview", web::get().to(admin::overview))
            .route("/analytics/bookings", web::get().to(admin::booking_stats))
            .route("/analytics/revenue", web::get().to(admin::revenue_stats))
            .route("/bookings", web::get().to(bookings::admin_list))
            .route("/bookings/export", web::get().to(bookings::admin_export))
            .route("/bookings/{id}", web::put().to(bookings::admin_update_status))
            .route("/bookings/{id}", web::delete().to(bookings::admin_delete))
            .route("/bookings/{id}/assign", web::put().to(bookings::admin_assign))
            .route("/beauticians", web::post().to(beauticians::create_beautician))
            .route("/beauticians", web::get().to(beauticians::list_beauticians))
            .route("/beauticians/{id}", web::get().to(beauticians::get_beautician))
            .route("/beauticians/{id}", web::put().to(beauticians::update_beautician))
            .route("/beauticians/{id}", web::delete().to(beauticians::delete_beautician))
            .route(
                "/beauticians/{id}/toggle-active",
                web::patch().to(beauticians::toggle_active),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_zero_also_matches_unversioned_documents() {
        let id = ObjectId::new();
        let filter = version_filter(id, 0);
        let any_of = filter.get_document("version").unwrap().get_array("$in").unwrap();
        assert!(any_of.contains(&Bson::Null));

        let filter = version_filter(id, 3);
        assert_eq!(filter.get_i64("version").unwrap(), 3);
        assert_eq!(filter.get_object_id("_id").unwrap(), id);
    }
}
