use std::collections::HashMap;
use std::sync::Arc;

use mongodb::{
    bson::{doc, oid::ObjectId},
    Collection,
};
use tracing::{debug, error, info, warn};

use crate::config::MongoConfig;
use crate::gateways::{Fcm, PushOutcome, PushPayload};
use crate::models::{
    collections, Booking, Notification, NotificationKind, NotificationMetadata, User,
};

/// Records user-facing notifications and pushes them to the user's device.
///
/// Neither step can fail the caller: the state change that triggered the
/// notification has already been written when `notify` runs.
#[derive(Clone)]
pub struct Notifier {
    notifications: Collection<Notification>,
    users: Collection<User>,
    fcm: Arc<Fcm>,
}

impl Notifier {
    pub fn new(db: &MongoConfig, fcm: Fcm) -> Self {
        Notifier {
            notifications: db.collection(collections::NOTIFICATIONS),
            users: db.collection(collections::USERS),
            fcm: Arc::new(fcm),
        }
    }

    pub async fn notify(
        &self,
        user: ObjectId,
        title: &str,
        message: &str,
        kind: NotificationKind,
        metadata: NotificationMetadata,
    ) {
        let data = push_data(kind, &metadata);
        let notification = Notification::new(user, title, message, kind, metadata);

        if let Err(e) = self.notifications.insert_one(&notification, None).await {
            error!("Failed to record notification '{}' for {}: {}", title, user, e);
            return;
        }
        debug!("Notification '{}' recorded for {}", title, user);

        self.push(user, title, message, data).await;
    }

    /// Shorthand for booking lifecycle notifications.
    pub async fn booking(&self, booking: &Booking, title: &str, message: &str) {
        self.notify(
            booking.user,
            title,
            message,
            NotificationKind::Booking,
            NotificationMetadata::booking(booking.id),
        )
        .await;
    }

    async fn push(&self, user: ObjectId, title: &str, body: &str, data: HashMap<String, String>) {
        let token = match self.users.find_one(doc! { "_id": user }, None).await {
            Ok(Some(User { fcm_token: Some(token), .. })) => token,
            Ok(_) => {
                debug!("Push notification skipped: no device token for {}", user);
                return;
            }
            Err(e) => {
                warn!("Push notification skipped for {}: {}", user, e);
                return;
            }
        };

        let payload = PushPayload { title, body, data };
        match self.fcm.send(&token, &payload).await {
            PushOutcome::Sent => info!("Push notification sent to {}", user),
            PushOutcome::Disabled => debug!("Push delivery is not configured"),
            PushOutcome::Unregistered => {
                info!("Device token for {} is no longer valid, removing it", user);
                if let Err(e) = self
                    .users
                    .update_one(doc! { "_id": user }, doc! { "$unset": { "fcmToken": "" } }, None)
                    .await
                {
                    warn!("Failed to clear device token for {}: {}", user, e);
                }
            }
            PushOutcome::Failed(reason) => warn!("Push notification to {} failed: {}", user, reason),
        }
    }
}

fn push_data(kind: NotificationKind, metadata: &NotificationMetadata) -> HashMap<String, String> {
    let mut data = HashMap::from([("type".to_string(), kind.as_str().to_string())]);
    if let Some(id) = metadata.booking_id {
        data.insert("bookingId".into(), id.to_hex());
    }
    if let Some(id) = metadata.service_id {
        data.insert("serviceId".into(), id.to_hex());
    }
    if let Some(id) = &metadata.offer_id {
        data.insert("offerId".into(), id.clone());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_data_mirrors_metadata() {
        let booking = ObjectId::new();
        let data = push_data(NotificationKind::Booking, &NotificationMetadata::booking(Some(booking)));
        assert_eq!(data["type"], "booking");
        assert_eq!(data["bookingId"], booking.to_hex());
        assert!(!data.contains_key("serviceId"));
    }
}
