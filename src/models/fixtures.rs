//! Sample documents for unit tests.

use mongodb::bson::{oid::ObjectId, DateTime};

use super::booking::{Address, Booking, Checkout, PaymentMethod};
use super::catalog::Service;

pub fn service(price: f64, gst: Option<f64>) -> Service {
    let now = DateTime::now();
    Service {
        id: Some(ObjectId::new()),
        name: "Manicure".into(),
        description: "Classic".into(),
        price,
        gst_amount: gst,
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

pub fn details(method: PaymentMethod) -> Checkout {
    Checkout {
        address: Address {
            city: Some("Pune".into()),
            ..Default::default()
        },
        phone_number: "9999999999".into(),
        payment_method: method,
        scheduled_at: DateTime::from_millis(DateTime::now().timestamp_millis() + 86_400_000),
    }
}

/// A stored single-line booking of a 500 service.
pub fn booking(method: PaymentMethod) -> Booking {
    let s = service(500.0, None);
    let mut b = Booking::from_selection(ObjectId::new(), vec![(&s, vec![], 1)], details(method))
        .unwrap();
    b.id = Some(ObjectId::new());
    b
}
