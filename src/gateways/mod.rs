pub mod fcm;
pub mod firebase;
pub mod imagekit;
pub mod razorpay;

pub use fcm::{Fcm, PushOutcome, PushPayload};
pub use firebase::FirebaseAuth;
pub use imagekit::ImageKit;
pub use razorpay::Razorpay;
