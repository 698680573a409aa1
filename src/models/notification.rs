use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Booking,
    Offer,
    Reminder,
    Feedback,
    Announcement,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Booking => "booking",
            NotificationKind::Offer => "offer",
            NotificationKind::Reminder => "reminder",
            NotificationKind::Feedback => "feedback",
            NotificationKind::Announcement => "announcement",
        }
    }
}

/// Back-references to whatever triggered the notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer_id: Option<String>,
}

impl NotificationMetadata {
    pub fn booking(id: Option<ObjectId>) -> Self {
        NotificationMetadata {
            booking_id: id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user: ObjectId,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub metadata: NotificationMetadata,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Notification {
    pub fn new(
        user: ObjectId,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        metadata: NotificationMetadata,
    ) -> Self {
        let now = DateTime::now();
        Notification {
            id: None,
            user,
            title: title.into(),
            message: message.into(),
            kind,
            is_read: false,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stored_under_type() {
        let n = Notification::new(
            ObjectId::new(),
            "Booking Confirmed",
            "See you soon",
            NotificationKind::Booking,
            NotificationMetadata::booking(Some(ObjectId::new())),
        );
        let doc = mongodb::bson::to_document(&n).unwrap();
        assert_eq!(doc.get_str("type").unwrap(), "booking");
        assert!(!doc.get_bool("isRead").unwrap());
        assert!(doc.get_document("metadata").unwrap().contains_key("bookingId"));
        assert!(!doc.contains_key("_id"));
    }
}
