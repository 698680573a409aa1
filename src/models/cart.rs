use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::catalog::{addons_total, Addon, Service};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub service: ObjectId,
    #[serde(default)]
    pub addons: Vec<Addon>,
    pub quantity: i32,
    pub total_price: f64,
}

/// One cart per user. `grand_total` is cached and must always equal the
/// sum of the line totals, so every mutator ends with `recompute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user: ObjectId,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub grand_total: f64,
    /// Bumped on every write; writes are conditional on the value read.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

pub fn line_total(unit_price: f64, addons: &[Addon], quantity: i32) -> f64 {
    (unit_price + addons_total(addons)) * f64::from(quantity)
}

impl Cart {
    pub fn new(user: ObjectId) -> Self {
        let now = DateTime::now();
        Cart {
            id: None,
            user,
            items: Vec::new(),
            grand_total: 0.0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, item_id: &ObjectId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.id == item_id)
    }

    /// Adds `quantity` of a service. A line with the same service and the
    /// same addons (compared in order) absorbs the new amount instead of
    /// a duplicate line being created. Returns the id of the affected line.
    pub fn add_item(
        &mut self,
        service: &Service,
        addons: Vec<Addon>,
        quantity: i32,
    ) -> ApiResult<ObjectId> {
        if quantity < 1 {
            return Err(ApiError::InvalidArgument("Quantity must be at least 1".into()));
        }
        let service_id = service
            .id
            .ok_or_else(|| ApiError::Internal("service loaded without an id".into()))?;
        let amount = line_total(service.price, &addons, quantity);

        let line_id = match self
            .items
            .iter_mut()
            .find(|item| item.service == service_id && item.addons == addons)
        {
            Some(existing) => {
                existing.quantity += quantity;
                existing.total_price += amount;
                existing.id
            }
            None => {
                let id = ObjectId::new();
                self.items.push(CartItem {
                    id,
                    service: service_id,
                    addons,
                    quantity,
                    total_price: amount,
                });
                id
            }
        };

        self.recompute();
        Ok(line_id)
    }

    /// Drops the line if present. Missing lines are not an error.
    pub fn remove_item(&mut self, item_id: &ObjectId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| &item.id != item_id);
        self.recompute();
        self.items.len() != before
    }

    /// Sets a line's quantity and reprices it from the service's current
    /// price plus the line's own addons. Leaves the cart untouched on error.
    pub fn update_quantity(
        &mut self,
        item_id: &ObjectId,
        current_price: f64,
        quantity: i32,
    ) -> ApiResult<()> {
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == item_id)
            .ok_or_else(|| ApiError::not_found("Item"))?;

        if quantity < 1 {
            return Err(ApiError::InvalidArgument("Quantity must be at least 1".into()));
        }

        item.quantity = quantity;
        item.total_price = line_total(current_price, &item.addons, quantity);
        self.recompute();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.recompute();
    }

    fn recompute(&mut self) {
        self.grand_total = self.items.iter().map(|item| item.total_price).sum();
        self.updated_at = DateTime::now();
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub service_id: String,
    #[serde(default)]
    #[validate]
    pub addons: Vec<Addon>,
    #[serde(default = "one")]
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

fn one() -> i32 {
    1
}

/// Cart line joined with its service document for responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub service: Option<Service>,
    pub addons: Vec<Addon>,
    pub quantity: i32,
    pub total_price: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub items: Vec<CartItemView>,
    pub grand_total: f64,
}

impl CartView {
    pub fn empty() -> Self {
        CartView {
            id: None,
            items: Vec::new(),
            grand_total: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(price: f64) -> Service {
        let now = DateTime::now();
        Service {
            id: Some(ObjectId::new()),
            name: "Facial".into(),
            description: "Glow facial".into(),
            price,
            gst_amount: None,
            duration: 30,
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

    fn addon(name: &str, price: f64) -> Addon {
        Addon { name: name.into(), price }
    }

    fn sum_of_lines(cart: &Cart) -> f64 {
        cart.items.iter().map(|i| i.total_price).sum()
    }

    #[test]
    fn same_service_and_addons_merge_into_one_line() {
        let a = service(500.0);
        let mut cart = Cart::new(ObjectId::new());

        cart.add_item(&a, vec![], 1).unwrap();
        assert_eq!(cart.grand_total, 500.0);

        cart.add_item(&a, vec![], 2).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.items[0].total_price, 1500.0);
        assert_eq!(cart.grand_total, 1500.0);
    }

    #[test]
    fn different_addons_make_a_distinct_line() {
        let a = service(300.0);
        let mut cart = Cart::new(ObjectId::new());

        cart.add_item(&a, vec![], 1).unwrap();
        cart.add_item(&a, vec![addon("X", 50.0)], 1).unwrap();
        assert_eq!(cart.items.len(), 2);
        assert_eq!(cart.grand_total, 650.0);
    }

    #[test]
    fn addon_order_matters_for_merging() {
        let a = service(100.0);
        let mut cart = Cart::new(ObjectId::new());

        cart.add_item(&a, vec![addon("X", 10.0), addon("Y", 20.0)], 1).unwrap();
        cart.add_item(&a, vec![addon("Y", 20.0), addon("X", 10.0)], 1).unwrap();
        assert_eq!(cart.items.len(), 2);
    }

    #[test]
    fn update_quantity_reprices_from_current_price() {
        let b = service(300.0);
        let mut cart = Cart::new(ObjectId::new());

        let line = cart.add_item(&b, vec![addon("X", 50.0)], 1).unwrap();
        assert_eq!(cart.grand_total, 350.0);

        cart.update_quantity(&line, 300.0, 3).unwrap();
        assert_eq!(cart.items[0].total_price, 1050.0);
        assert_eq!(cart.grand_total, 1050.0);

        // A catalog price change is picked up on the next quantity update.
        cart.update_quantity(&line, 320.0, 3).unwrap();
        assert_eq!(cart.grand_total, 1110.0);
    }

    #[test]
    fn non_positive_quantity_is_rejected_without_side_effects() {
        let b = service(300.0);
        let mut cart = Cart::new(ObjectId::new());
        let line = cart.add_item(&b, vec![], 2).unwrap();

        for bad in [0, -1] {
            let err = cart.update_quantity(&line, 300.0, bad).unwrap_err();
            assert!(matches!(err, ApiError::InvalidArgument(_)));
        }
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.grand_total, 600.0);

        assert!(matches!(
            cart.add_item(&b, vec![], 0),
            Err(ApiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn update_of_unknown_line_is_not_found() {
        let mut cart = Cart::new(ObjectId::new());
        let err = cart.update_quantity(&ObjectId::new(), 100.0, 1).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn grand_total_tracks_lines_through_any_sequence() {
        let a = service(500.0);
        let b = service(300.0);
        let mut cart = Cart::new(ObjectId::new());

        let l1 = cart.add_item(&a, vec![], 1).unwrap();
        assert_eq!(cart.grand_total, sum_of_lines(&cart));
        let l2 = cart.add_item(&b, vec![addon("X", 50.0)], 2).unwrap();
        assert_eq!(cart.grand_total, sum_of_lines(&cart));
        cart.add_item(&a, vec![], 4).unwrap();
        assert_eq!(cart.grand_total, sum_of_lines(&cart));
        cart.update_quantity(&l2, 300.0, 1).unwrap();
        assert_eq!(cart.grand_total, sum_of_lines(&cart));
        assert!(cart.remove_item(&l1));
        assert_eq!(cart.grand_total, sum_of_lines(&cart));
        assert_eq!(cart.grand_total, 350.0);
        assert!(!cart.remove_item(&l1));
        assert_eq!(cart.grand_total, 350.0);
    }

    #[test]
    fn clear_empties_and_zeroes() {
        let mut cart = Cart::new(ObjectId::new());
        cart.add_item(&service(200.0), vec![], 2).unwrap();
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.grand_total, 0.0);
    }
}
