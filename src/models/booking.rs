use std::collections::HashMap;

use chrono::{DateTime as ChronoDateTime, Utc};
use mongodb::bson::{oid::ObjectId, Bson, DateTime};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::cart::{line_total, Cart};
use super::catalog::{Addon, Service};
use crate::error::{ApiError, ApiResult};

/// Fulfillment status. Older records spelled `assigned` as `confirmed`;
/// they still read back as `Assigned` and are rewritten canonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "assigned", alias = "confirmed")]
    Assigned,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Assigned,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Assigned => "assigned",
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Every spelling a stored document may carry for this status.
    pub fn stored_spellings(&self) -> Vec<&'static str> {
        match self {
            BookingStatus::Assigned => vec!["assigned", "confirmed"],
            other => vec![other.as_str()],
        }
    }

    /// Query fragment matching this status, legacy spellings included.
    pub fn filter_value(&self) -> Bson {
        let spellings: Vec<Bson> = self
            .stored_spellings()
            .into_iter()
            .map(|s| Bson::String(s.to_string()))
            .collect();
        Bson::Document(mongodb::bson::doc! { "$in": spellings })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// `UPI` and `Card` from older records both mean an online payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "COD")]
    Cod,
    #[serde(rename = "Online", alias = "UPI", alias = "Card")]
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "COD",
            PaymentMethod::Online => "Online",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1))]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 4, max = 10))]
    pub pincode: Option<String>,
}

/// A snapshot of one service selection at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingLine {
    pub service: ObjectId,
    pub quantity: i32,
    /// Unit price of the service when booked.
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gst_amount: Option<f64>,
    #[serde(default)]
    pub addons: Vec<Addon>,
}

impl BookingLine {
    pub fn subtotal(&self) -> f64 {
        line_total(self.price, &self.addons, self.quantity)
    }

    pub fn gst(&self) -> f64 {
        self.gst_amount
            .map(|pct| self.subtotal() * pct / 100.0)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user: ObjectId,
    pub services: Vec<BookingLine>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub phone_number: String,
    pub amount: f64,
    #[serde(default)]
    pub total_gst: f64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub scheduled_at: DateTime,
    pub booking_date: DateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beautician: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub razorpay_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub razorpay_payment_id: Option<String>,
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

/// The checkout details shared by cart and ad-hoc bookings.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub address: Address,
    pub phone_number: String,
    pub payment_method: PaymentMethod,
    pub scheduled_at: DateTime,
}

/// Checks out a whole cart: the new booking plus the cart as it must be
/// written back, emptied and one version ahead.
pub fn checkout(
    cart: &Cart,
    catalog: &HashMap<ObjectId, Service>,
    details: Checkout,
) -> ApiResult<(Booking, Cart)> {
    let booking = Booking::from_cart(cart, catalog, details)?;
    let mut emptied = cart.clone();
    emptied.clear();
    emptied.version += 1;
    Ok((booking, emptied))
}

impl Booking {
    fn from_lines(user: ObjectId, services: Vec<BookingLine>, amount: f64, checkout: Checkout) -> Self {
        let now = DateTime::now();
        let total_gst = services.iter().map(BookingLine::gst).sum();
        Booking {
            id: None,
            user,
            services,
            address: checkout.address,
            phone_number: checkout.phone_number,
            amount,
            total_gst,
            payment_method: checkout.payment_method,
            // Every method starts unpaid; COD is settled by an admin and
            // online payments by signature verification.
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Pending,
            scheduled_at: checkout.scheduled_at,
            booking_date: now,
            beautician: None,
            razorpay_order_id: None,
            razorpay_payment_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshots every cart line against the catalog as it stands now.
    /// The amount is the cart's grand total.
    pub fn from_cart(
        cart: &Cart,
        catalog: &HashMap<ObjectId, Service>,
        checkout: Checkout,
    ) -> ApiResult<Self> {
        if cart.is_empty() {
            return Err(ApiError::InvalidArgument("Cart is empty".into()));
        }

        let lines = cart
            .items
            .iter()
            .map(|item| {
                let service = catalog
                    .get(&item.service)
                    .ok_or_else(|| ApiError::not_found("Service"))?;
                Ok(BookingLine {
                    service: item.service,
                    quantity: item.quantity,
                    price: service.price,
                    gst_amount: service.gst_amount,
                    addons: item.addons.clone(),
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        Ok(Self::from_lines(cart.user, lines, cart.grand_total, checkout))
    }

    /// Books an explicit selection without going through the cart.
    pub fn from_selection(
        user: ObjectId,
        selection: Vec<(&Service, Vec<Addon>, i32)>,
        checkout: Checkout,
    ) -> ApiResult<Self> {
        if selection.is_empty() {
            return Err(ApiError::InvalidArgument("At least one service is required".into()));
        }

        let lines = selection
            .into_iter()
            .map(|(service, addons, quantity)| {
                if quantity < 1 {
                    return Err(ApiError::InvalidArgument("Quantity must be at least 1".into()));
                }
                let id = service
                    .id
                    .ok_or_else(|| ApiError::Internal("service loaded without an id".into()))?;
                Ok(BookingLine {
                    service: id,
                    quantity,
                    price: service.price,
                    gst_amount: service.gst_amount,
                    addons,
                })
            })
            .collect::<ApiResult<Vec<_>>>()?;

        let amount = lines.iter().map(BookingLine::subtotal).sum();
        Ok(Self::from_lines(user, lines, amount, checkout))
    }

    /// User cancellation, only allowed before anything has been arranged.
    pub fn cancel(&mut self) -> ApiResult<()> {
        if self.status != BookingStatus::Pending {
            return Err(ApiError::InvalidState(
                "Only pending bookings can be cancelled".into(),
            ));
        }
        self.status = BookingStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Admin override: each field is applied independently and without
    /// transition checks. Returns true when the fulfillment status changed.
    pub fn apply_admin_update(
        &mut self,
        status: Option<BookingStatus>,
        payment_status: Option<PaymentStatus>,
    ) -> bool {
        let mut status_changed = false;
        if let Some(status) = status {
            status_changed = status != self.status;
            self.status = status;
        }
        if let Some(payment_status) = payment_status {
            self.payment_status = payment_status;
        }
        self.touch();
        status_changed
    }

    /// Attaches a beautician; a pending booking becomes `assigned`.
    pub fn assign(&mut self, beautician: ObjectId) -> ApiResult<()> {
        if self.status.is_terminal() {
            return Err(ApiError::InvalidState(format!(
                "Cannot assign a beautician to a {} booking",
                self.status
            )));
        }
        self.beautician = Some(beautician);
        if self.status == BookingStatus::Pending {
            self.status = BookingStatus::Assigned;
        }
        self.touch();
        Ok(())
    }

    pub fn mark_paid(&mut self, order_id: &str, payment_id: &str) {
        self.payment_status = PaymentStatus::Paid;
        self.payment_method = PaymentMethod::Online;
        self.razorpay_order_id = Some(order_id.to_string());
        self.razorpay_payment_id = Some(payment_id.to_string());
        self.touch();
    }

    /// An online booking still unpaid after `window_millis` since creation.
    pub fn is_abandoned(&self, now: DateTime, window_millis: i64) -> bool {
        self.payment_method == PaymentMethod::Online
            && self.payment_status == PaymentStatus::Pending
            && self.created_at.timestamp_millis() < now.timestamp_millis() - window_millis
    }

    fn touch(&mut self) {
        self.updated_at = DateTime::now();
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelectedService {
    pub service_id: String,
    #[serde(default = "one")]
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(default)]
    #[validate]
    pub addons: Vec<Addon>,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    #[validate]
    pub address: Address,
    #[validate(length(min = 10, max = 13))]
    pub phone_number: String,
    pub payment_method: PaymentMethod,
    pub scheduled_at: ChronoDateTime<Utc>,
    /// When present the booking is made from these instead of the cart.
    pub services: Option<Vec<SelectedService>>,
}

impl CreateBookingRequest {
    pub fn checkout(&self) -> Checkout {
        Checkout {
            address: self.address.clone(),
            phone_number: self.phone_number.trim().to_string(),
            payment_method: self.payment_method,
            scheduled_at: DateTime::from_millis(self.scheduled_at.timestamp_millis()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingStatusRequest {
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBeauticianRequest {
    pub beautician_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{booking, details, service};

    #[test]
    fn checkout_snapshots_cart_and_starts_pending() {
        let s = service(500.0, Some(18.0));
        let mut cart = Cart::new(ObjectId::new());
        cart.add_item(&s, vec![Addon { name: "X".into(), price: 100.0 }], 2).unwrap();
        let catalog = HashMap::from([(s.id.unwrap(), s.clone())]);

        let booking = Booking::from_cart(&cart, &catalog, details(PaymentMethod::Cod)).unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.amount, 1200.0);
        assert_eq!(booking.services.len(), 1);
        assert_eq!(booking.services[0].price, 500.0);
        assert_eq!(booking.services[0].gst_amount, Some(18.0));
        assert_eq!(booking.services[0].addons.len(), 1);
        assert!((booking.total_gst - 216.0).abs() < 1e-9);
        assert_eq!(booking.user, cart.user);
    }

    #[test]
    fn checkout_yields_pending_booking_and_empty_cart() {
        let s = service(400.0, None);
        let mut cart = Cart::new(ObjectId::new());
        cart.add_item(&s, vec![], 2).unwrap();
        cart.version = 3;
        let catalog = HashMap::from([(s.id.unwrap(), s.clone())]);

        let (booking, emptied) = checkout(&cart, &catalog, details(PaymentMethod::Online)).unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.amount, 800.0);
        assert_eq!(booking.services[0].quantity, 2);

        assert!(emptied.items.is_empty());
        assert_eq!(emptied.grand_total, 0.0);
        assert_eq!(emptied.version, 4);
        assert_eq!(emptied.user, cart.user);
        assert_eq!(cart.items.len(), 1, "the source cart is left as read");
    }

    #[test]
    fn failed_checkout_produces_nothing() {
        let cart = Cart::new(ObjectId::new());
        assert!(checkout(&cart, &HashMap::new(), details(PaymentMethod::Cod)).is_err());
    }

    #[test]
    fn online_bookings_also_start_unpaid() {
        assert_eq!(booking(PaymentMethod::Online).payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn empty_cart_cannot_be_checked_out() {
        let cart = Cart::new(ObjectId::new());
        let err = Booking::from_cart(&cart, &HashMap::new(), details(PaymentMethod::Cod))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn checkout_fails_when_a_service_vanished() {
        let s = service(200.0, None);
        let mut cart = Cart::new(ObjectId::new());
        cart.add_item(&s, vec![], 1).unwrap();
        let err = Booking::from_cart(&cart, &HashMap::new(), details(PaymentMethod::Cod))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn only_pending_bookings_can_be_cancelled() {
        let mut b = booking(PaymentMethod::Cod);
        b.cancel().unwrap();
        assert_eq!(b.status, BookingStatus::Cancelled);

        let err = b.cancel().unwrap_err();
        assert_eq!(err.to_string(), "Only pending bookings can be cancelled");
        assert_eq!(b.status, BookingStatus::Cancelled);

        for status in [BookingStatus::Assigned, BookingStatus::InProgress, BookingStatus::Completed] {
            let mut b = booking(PaymentMethod::Cod);
            b.status = status;
            assert!(matches!(b.cancel(), Err(ApiError::InvalidState(_))));
            assert_eq!(b.status, status);
        }
    }

    #[test]
    fn admin_update_applies_fields_independently() {
        let mut b = booking(PaymentMethod::Cod);
        assert!(!b.apply_admin_update(None, Some(PaymentStatus::Paid)));
        assert_eq!(b.status, BookingStatus::Pending);
        assert_eq!(b.payment_status, PaymentStatus::Paid);

        let mut unpaid = booking(PaymentMethod::Cod);
        assert!(unpaid.apply_admin_update(Some(BookingStatus::Completed), None));
        assert_eq!(unpaid.payment_status, PaymentStatus::Pending);
        assert!(!unpaid.apply_admin_update(Some(BookingStatus::Completed), None));
    }

    #[test]
    fn assignment_moves_pending_to_assigned() {
        let mut b = booking(PaymentMethod::Cod);
        let who = ObjectId::new();
        b.assign(who).unwrap();
        assert_eq!(b.status, BookingStatus::Assigned);
        assert_eq!(b.beautician, Some(who));

        b.status = BookingStatus::Cancelled;
        assert!(matches!(b.assign(who), Err(ApiError::InvalidState(_))));
    }

    #[test]
    fn abandonment_predicate() {
        const WINDOW: i64 = 5 * 60 * 1000;
        let now = DateTime::now();
        let six_minutes_ago = DateTime::from_millis(now.timestamp_millis() - 6 * 60 * 1000);

        let mut online = booking(PaymentMethod::Online);
        online.created_at = six_minutes_ago;
        assert!(online.is_abandoned(now, WINDOW));

        let mut cod = booking(PaymentMethod::Cod);
        cod.created_at = six_minutes_ago;
        assert!(!cod.is_abandoned(now, WINDOW));

        let mut paid = online.clone();
        paid.mark_paid("order_1", "pay_1");
        assert!(!paid.is_abandoned(now, WINDOW));

        let mut fresh = booking(PaymentMethod::Online);
        fresh.created_at = DateTime::from_millis(now.timestamp_millis() - WINDOW);
        assert!(!fresh.is_abandoned(now, WINDOW), "exactly at the window is not older");
    }

    #[test]
    fn legacy_spellings_read_as_canonical() {
        let status: BookingStatus = serde_json::from_str("\"confirmed\"").unwrap();
        assert_eq!(status, BookingStatus::Assigned);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"assigned\"");

        let method: PaymentMethod = serde_json::from_str("\"UPI\"").unwrap();
        assert_eq!(method, PaymentMethod::Online);
        let method: PaymentMethod = serde_json::from_str("\"Card\"").unwrap();
        assert_eq!(method, PaymentMethod::Online);

        let in_progress: BookingStatus = serde_json::from_str("\"in-progress\"").unwrap();
        assert_eq!(in_progress, BookingStatus::InProgress);
        assert_eq!(BookingStatus::Assigned.stored_spellings(), vec!["assigned", "confirmed"]);
    }

    #[test]
    fn ad_hoc_selection_sums_lines() {
        let a = service(300.0, None);
        let b = service(150.0, Some(5.0));
        let booking = Booking::from_selection(
            ObjectId::new(),
            vec![
                (&a, vec![Addon { name: "X".into(), price: 50.0 }], 1),
                (&b, vec![], 2),
            ],
            details(PaymentMethod::Online),
        )
        .unwrap();
        assert_eq!(booking.amount, 650.0);
        assert!((booking.total_gst - 15.0).abs() < 1e-9);
    }
}
