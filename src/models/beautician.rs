use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::user::validate_phone;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beautician {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub services: Vec<ObjectId>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub bookings: Vec<ObjectId>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBeauticianRequest {
    #[validate(length(min = 2))]
    pub name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBeauticianRequest {
    #[validate(length(min = 2))]
    pub name: Option<String>,
    #[validate(custom = "validate_phone")]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub skills: Option<Vec<String>>,
    pub services: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl UpdateBeauticianRequest {
    /// Builds the `$set` body; service ids are parsed by the caller.
    pub fn to_set_document(&self, services: Option<Vec<ObjectId>>) -> Document {
        let mut set = doc! { "updatedAt": DateTime::now() };

        if let Some(name) = &self.name {
            set.insert("name", name.trim());
        }
        if let Some(phone) = &self.phone {
            set.insert("phone", phone.as_str());
        }
        if let Some(email) = &self.email {
            set.insert("email", email.trim().to_lowercase());
        }
        if let Some(skills) = &self.skills {
            set.insert("skills", skills.clone());
        }
        if let Some(services) = services {
            set.insert("services", services);
        }
        if let Some(active) = self.is_active {
            set.insert("isActive", active);
        }

        set
    }
}

impl Beautician {
    pub fn new(request: CreateBeauticianRequest, services: Vec<ObjectId>) -> Self {
        let now = DateTime::now();
        Beautician {
            id: None,
            name: request.name.trim().to_string(),
            phone: request.phone,
            email: request.email.map(|e| e.trim().to_lowercase()),
            skills: request.skills,
            services,
            is_active: true,
            rating: 0.0,
            bookings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_sets_only_supplied_fields() {
        let request = UpdateBeauticianRequest {
            name: Some("  Asha ".into()),
            email: Some("Asha@Example.com".into()),
            is_active: Some(false),
            ..Default::default()
        };
        let set = request.to_set_document(None);

        assert_eq!(set.get_str("name").unwrap(), "Asha");
        assert_eq!(set.get_str("email").unwrap(), "asha@example.com");
        assert!(!set.get_bool("isActive").unwrap());
        assert!(set.contains_key("updatedAt"));
        assert!(!set.contains_key("phone"));
        assert!(!set.contains_key("services"));

        let service = ObjectId::new();
        let set = UpdateBeauticianRequest::default().to_set_document(Some(vec![service]));
        assert_eq!(set.get_array("services").unwrap().len(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn update_rejects_a_bad_phone() {
        let request = UpdateBeauticianRequest {
            phone: Some("12345".into()),
            ..Default::default()
        };
        assert!(request.validate().is_err());
        assert!(UpdateBeauticianRequest::default().validate().is_ok());
    }
}
