use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use serde_json::json;
use tracing::{debug, info, warn};
use validator::Validate;

use super::{replace_if_unchanged, MAX_WRITE_ATTEMPTS};
use crate::auth::AuthUser;
use crate::config::MongoConfig;
use crate::error::{parse_id, ApiError, ApiResult};
use crate::models::{
    cart::{AddToCartRequest, CartItemView, CartView, UpdateQuantityRequest},
    collections, Cart, Service,
};

fn carts(db: &MongoConfig) -> Collection<Cart> {
    db.collection(collections::CARTS)
}

fn services(db: &MongoConfig) -> Collection<Service> {
    db.collection(collections::SERVICES)
}

async fn find_service(db: &MongoConfig, service_id: ObjectId) -> ApiResult<Service> {
    services(db)
        .find_one(doc! { "_id": service_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Service"))
}

/// With `create` set a missing cart starts empty, else it is NotFound.
fn cart_or_new(stored: Option<Cart>, user: ObjectId, create: bool) -> ApiResult<Cart> {
    match stored {
        Some(cart) => Ok(cart),
        None if create => Ok(Cart::new(user)),
        None => Err(ApiError::not_found("Cart")),
    }
}

/// Loads the user's cart, applies `change` and writes it back only if no
/// other request wrote in between; otherwise reloads and tries again.
async fn modify_cart<F>(
    db: &MongoConfig,
    user: ObjectId,
    create: bool,
    mut change: F,
) -> ApiResult<Cart>
where
    F: FnMut(&mut Cart) -> ApiResult<()>,
{
    let collection = carts(db);

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        let stored = collection.find_one(doc! { "user": user }, None).await?;
        let mut cart = cart_or_new(stored, user, create)?;
        change(&mut cart)?;

        match cart.id {
            None => match collection.insert_one(&cart, None).await {
                Ok(result) => {
                    cart.id = result.inserted_id.as_object_id();
                    return Ok(cart);
                }
                Err(e) => {
                    let e = ApiError::from(e);
                    if !e.is_duplicate_key() {
                        return Err(e);
                    }
                    // Another request created the cart first.
                    debug!("Cart for {} created concurrently (attempt {})", user, attempt);
                }
            },
            Some(id) => {
                let expected = cart.version;
                cart.version += 1;
                if replace_if_unchanged(&collection, id, expected, &cart).await? {
                    return Ok(cart);
                }
                debug!("Cart {} changed concurrently (attempt {})", id, attempt);
            }
        }
    }

    warn!("Giving up on cart write for {} after {} attempts", user, MAX_WRITE_ATTEMPTS);
    Err(ApiError::Conflict(
        "Cart was modified concurrently, please retry".into(),
    ))
}

/// Joins each line with its current service document. Lines whose
/// service has since been deleted carry `service: null`.
async fn cart_view(db: &MongoConfig, cart: Cart) -> ApiResult<CartView> {
    let ids: Vec<ObjectId> = cart.items.iter().map(|item| item.service).collect();
    let found: Vec<Service> = services(db)
        .find(doc! { "_id": { "$in": ids } }, None)
        .await?
        .try_collect()
        .await?;
    let by_id: HashMap<ObjectId, Service> = found
        .into_iter()
        .filter_map(|s| s.id.map(|id| (id, s)))
        .collect();

    Ok(view_from(cart, &by_id))
}

fn view_from(cart: Cart, services: &HashMap<ObjectId, Service>) -> CartView {
    CartView {
        id: cart.id,
        grand_total: cart.grand_total,
        items: cart
            .items
            .into_iter()
            .map(|item| CartItemView {
                id: item.id,
                service: services.get(&item.service).cloned(),
                addons: item.addons,
                quantity: item.quantity,
                total_price: item.total_price,
            })
            .collect(),
    }
}

fn cart_response(view: CartView) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "cart": view }))
}

pub async fn get_cart(user: AuthUser, db: web::Data<MongoConfig>) -> ApiResult<HttpResponse> {
    debug!("Fetching cart for {}", user.id);

    let view = match carts(&db).find_one(doc! { "user": user.id }, None).await? {
        Some(cart) => cart_view(&db, cart).await?,
        None => CartView::empty(),
    };

    Ok(cart_response(view))
}

pub async fn add_item(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    body: web::Json<AddToCartRequest>,
) -> ApiResult<HttpResponse> {
    body.validate()?;
    let request = body.into_inner();
    let service_id = parse_id(&request.service_id, "service")?;

    debug!("Adding {} x{} to cart of {}", service_id, request.quantity, user.id);
    let service = find_service(&db, service_id).await?;

    let cart = modify_cart(&db, user.id, true, |cart| {
        cart.add_item(&service, request.addons.clone(), request.quantity)
            .map(|_| ())
    })
    .await?;

    info!("Cart of {} now totals {}", user.id, cart.grand_total);
    Ok(cart_response(cart_view(&db, cart).await?))
}

pub async fn update_quantity(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    item_id: web::Path<String>,
    body: web::Json<UpdateQuantityRequest>,
) -> ApiResult<HttpResponse> {
    let item_id = parse_id(&item_id, "item")?;
    if body.quantity < 1 {
        return Err(ApiError::InvalidArgument("Quantity must be at least 1".into()));
    }

    debug!("Setting quantity of {} to {} for {}", item_id, body.quantity, user.id);

    let cart = carts(&db)
        .find_one(doc! { "user": user.id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Cart"))?;
    let line = cart.item(&item_id).ok_or_else(|| ApiError::not_found("Item"))?;
    // Repriced from what the service costs today.
    let service = find_service(&db, line.service).await?;

    let cart = modify_cart(&db, user.id, false, |cart| {
        cart.update_quantity(&item_id, service.price, body.quantity)
    })
    .await?;

    info!("Cart of {} now totals {}", user.id, cart.grand_total);
    Ok(cart_response(cart_view(&db, cart).await?))
}

pub async fn remove_item(
    user: AuthUser,
    db: web::Data<MongoConfig>,
    item_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let item_id = parse_id(&item_id, "item")?;
    debug!("Removing {} from cart of {}", item_id, user.id);

    let cart = modify_cart(&db, user.id, false, |cart| {
        cart.remove_item(&item_id);
        Ok(())
    })
    .await?;

    info!("Cart of {} now totals {}", user.id, cart.grand_total);
    Ok(cart_response(cart_view(&db, cart).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::DateTime;

    fn service(price: f64) -> Service {
        let now = DateTime::now();
        Service {
            id: Some(ObjectId::new()),
            name: "Pedicure".into(),
            description: "Spa pedicure".into(),
            price,
            gst_amount: None,
            duration: 40,
            category: ObjectId::new(),
            image_url: None,
            is_included: Vec::new(),
            is_popular: false,
            is_active: true,
            addons: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn view_joins_services_and_tolerates_deleted_ones() {
        let kept = service(400.0);
        let gone = service(250.0);
        let mut cart = Cart::new(ObjectId::new());
        cart.add_item(&kept, vec![], 1).unwrap();
        cart.add_item(&gone, vec![], 2).unwrap();

        let catalog = HashMap::from([(kept.id.unwrap(), kept.clone())]);
        let view = view_from(cart, &catalog);

        assert_eq!(view.grand_total, 900.0);
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.items[0].service.as_ref().unwrap().name, "Pedicure");
        assert!(view.items[1].service.is_none());
        assert_eq!(view.items[1].total_price, 500.0);
    }

    #[test]
    fn empty_view_serializes_as_zero_total() {
        let json = serde_json::to_value(CartView::empty()).unwrap();
        assert_eq!(json["grandTotal"], 0.0);
        assert!(json["items"].as_array().unwrap().is_empty());
        assert!(json.get("_id").is_none());
    }

    #[test]
    fn missing_cart_is_only_created_when_asked() {
        let user = ObjectId::new();

        let err = cart_or_new(None, user, false).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.to_string(), "Cart not found");

        let fresh = cart_or_new(None, user, true).unwrap();
        assert!(fresh.id.is_none());
        assert!(fresh.is_empty());

        let mut stored = Cart::new(user);
        stored.id = Some(ObjectId::new());
        assert_eq!(cart_or_new(Some(stored.clone()), user, false).unwrap().id, stored.id);
    }
}
