use mongodb::bson::{doc, oid::ObjectId, DateTime, Document};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// A priced extra chosen alongside a service. Carts and bookings keep
/// their own copy, so later catalog edits never reprice them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Addon {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
}

pub fn addons_total(addons: &[Addon]) -> f64 {
    addons.iter().map(|a| a.price).sum()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub description: String,
    pub price: f64,
    /// GST as a percentage of the price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gst_amount: Option<f64>,
    /// Minutes.
    pub duration: i32,
    pub category: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_included: Vec<String>,
    #[serde(default)]
    pub is_popular: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub addons: Vec<Addon>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CategoryFields {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[validate(range(min = 0.0))]
    pub gst_amount: Option<f64>,
    #[validate(range(min = 15))]
    pub duration: i32,
    pub category: String,
    #[serde(default)]
    #[validate(length(max = 5))]
    pub is_included: Vec<String>,
    #[serde(default)]
    pub is_popular: bool,
    pub is_active: Option<bool>,
    #[serde(default)]
    #[validate]
    pub addons: Vec<Addon>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub gst_amount: Option<f64>,
    #[validate(range(min = 15))]
    pub duration: Option<i32>,
    pub category: Option<String>,
    #[validate(length(max = 5))]
    pub is_included: Option<Vec<String>>,
    pub is_popular: Option<bool>,
    pub is_active: Option<bool>,
    #[validate(custom = "validate_addons")]
    pub addons: Option<Vec<Addon>>,
}

fn validate_addons(addons: &Vec<Addon>) -> Result<(), ValidationError> {
    if addons.iter().all(|a| !a.name.is_empty() && a.price >= 0.0) {
        Ok(())
    } else {
        Err(ValidationError::new("addon"))
    }
}

impl Service {
    pub fn new(request: CreateServiceRequest, category: ObjectId, image_url: Option<String>) -> Self {
        let now = DateTime::now();
        Service {
            id: None,
            name: request.name.trim().to_string(),
            description: request.description,
            price: request.price,
            gst_amount: request.gst_amount,
            duration: request.duration,
            category,
            image_url,
            is_included: request.is_included,
            is_popular: request.is_popular,
            is_active: request.is_active.unwrap_or(true),
            addons: request.addons,
            created_at: now,
            updated_at: now,
        }
    }
}

impl UpdateServiceRequest {
    /// Builds the `$set` body; the category id is parsed by the caller.
    pub fn to_set_document(
        &self,
        category: Option<ObjectId>,
        image_url: Option<String>,
    ) -> Result<Document, mongodb::bson::ser::Error> {
        let mut set = doc! { "updatedAt": DateTime::now() };

        if let Some(name) = &self.name {
            set.insert("name", name.trim());
        }
        if let Some(description) = &self.description {
            set.insert("description", description);
        }
        if let Some(price) = self.price {
            set.insert("price", price);
        }
        if let Some(gst) = self.gst_amount {
            set.insert("gstAmount", gst);
        }
        if let Some(duration) = self.duration {
            set.insert("duration", duration);
        }
        if let Some(category) = category {
            set.insert("category", category);
        }
        if let Some(points) = &self.is_included {
            set.insert("isIncluded", points.clone());
        }
        if let Some(popular) = self.is_popular {
            set.insert("isPopular", popular);
        }
        if let Some(active) = self.is_active {
            set.insert("isActive", active);
        }
        if let Some(addons) = &self.addons {
            set.insert("addons", mongodb::bson::to_bson(addons)?);
        }
        if let Some(url) = image_url {
            set.insert("imageUrl", url);
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> CreateServiceRequest {
        CreateServiceRequest {
            name: " Hair Spa ".into(),
            description: "Deep conditioning".into(),
            price: 500.0,
            gst_amount: Some(18.0),
            duration: 45,
            category: ObjectId::new().to_hex(),
            is_included: vec!["Wash".into(), "Massage".into()],
            is_popular: false,
            is_active: None,
            addons: vec![Addon { name: "Serum".into(), price: 80.0 }],
        }
    }

    #[test]
    fn create_request_validation() {
        assert!(create_request().validate().is_ok());

        let mut short = create_request();
        short.duration = 10;
        assert!(short.validate().is_err());

        let mut crowded = create_request();
        crowded.is_included = (0..=5).map(|i| format!("point {}", i)).collect();
        assert!(crowded.validate().is_err());

        let mut negative_addon = create_request();
        negative_addon.addons[0].price = -1.0;
        assert!(negative_addon.validate().is_err());
    }

    #[test]
    fn new_service_trims_and_defaults_active() {
        let service = Service::new(create_request(), ObjectId::new(), None);
        assert_eq!(service.name, "Hair Spa");
        assert!(service.is_active);
        assert_eq!(service.duration, 45);
    }

    #[test]
    fn partial_update_only_sets_present_fields() {
        let update = UpdateServiceRequest {
            price: Some(650.0),
            is_popular: Some(true),
            ..Default::default()
        };
        let set = update.to_set_document(None, None).unwrap();
        assert_eq!(set.get_f64("price").unwrap(), 650.0);
        assert!(set.get_bool("isPopular").unwrap());
        assert!(!set.contains_key("name"));

        let bad = UpdateServiceRequest {
            addons: Some(vec![Addon { name: "Oil".into(), price: -5.0 }]),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(set.contains_key("updatedAt"));
    }

    #[test]
    fn addon_totals() {
        let addons = vec![
            Addon { name: "X".into(), price: 50.0 },
            Addon { name: "Y".into(), price: 25.5 },
        ];
        assert_eq!(addons_total(&addons), 75.5);
        assert_eq!(addons_total(&[]), 0.0);
    }
}
