use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Promotional banner shown on the home screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub image_url: String,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Offer {
    pub fn new(image_url: String, is_active: bool) -> Self {
        let now = DateTime::now();
        Offer {
            id: None,
            image_url,
            is_active,
            created_at: now,
            updated_at: now,
        }
    }
}
