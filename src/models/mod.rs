pub mod beautician;
pub mod booking;
pub mod cart;
pub mod catalog;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod notification;
pub mod offer;
pub mod user;

pub use beautician::Beautician;
pub use booking::{Booking, BookingStatus, PaymentMethod, PaymentStatus};
pub use cart::Cart;
pub use catalog::{Category, Service};
pub use notification::{Notification, NotificationKind, NotificationMetadata};
pub use offer::Offer;
pub use user::{Role, User, UserProfile};

/// Collection names.
pub mod collections {
    pub const BEAUTICIANS: &str = "beauticians";
    pub const BOOKINGS: &str = "bookings";
    pub const CARTS: &str = "carts";
    pub const CATEGORIES: &str = "categories";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const OFFERS: &str = "offers";
    pub const SERVICES: &str = "services";
    pub const USERS: &str = "users";
}
