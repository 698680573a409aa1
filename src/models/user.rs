use std::sync::OnceLock;

use mongodb::bson::{oid::ObjectId, DateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{ApiError, ApiResult};

pub const NEW_USER_REFERRAL_BONUS: f64 = 25.0;
pub const REFERRER_BONUS: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub phone: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub wallet: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<ObjectId>,
    #[serde(default)]
    pub favorites: Vec<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcm_token: Option<String>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub fn new(phone: String, name: String, email: Option<String>, role: Role) -> Self {
        let now = DateTime::now();
        User {
            id: None,
            phone,
            name: name.trim().to_string(),
            email: email.map(|e| e.trim().to_lowercase()),
            password_hash: None,
            role,
            wallet: 0.0,
            referral_code: None,
            referred_by: None,
            favorites: Vec::new(),
            fcm_token: None,
            is_blocked: false,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What clients get to see of a user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub role: Role,
    pub wallet: f64,
    pub referral_code: Option<String>,
    pub is_blocked: bool,
    pub created_at: DateTime,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
            role: user.role,
            wallet: user.wallet,
            referral_code: user.referral_code.clone(),
            is_blocked: user.is_blocked,
            created_at: user.created_at,
        }
    }
}

fn phone_pattern() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^[6-9]\d{9}$").expect("phone pattern is valid"))
}

/// Ten-digit Indian mobile number.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    if phone_pattern().is_match(phone) {
        Ok(())
    } else {
        Err(ValidationError::new("phone"))
    }
}

/// Referral codes are the last six characters of the user's id.
pub fn referral_code_for(id: &ObjectId) -> String {
    let hex = id.to_hex();
    hex[hex.len() - 6..].to_uppercase()
}

/// Checks and credits a referral. Both users are mutated only on success.
pub fn apply_referral(user: &mut User, referrer: &mut User) -> ApiResult<()> {
    if user.referred_by.is_some() {
        return Err(ApiError::InvalidState("Referral already applied".into()));
    }
    if user.id.is_some() && user.id == referrer.id {
        return Err(ApiError::Unauthorized("You cannot use your own code".into()));
    }

    user.referred_by = referrer.id;
    user.wallet += NEW_USER_REFERRAL_BONUS;
    referrer.wallet += REFERRER_BONUS;
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2))]
    pub name: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 6))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 2))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminSignupRequest {
    #[validate(length(min = 2))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom = "validate_phone")]
    pub phone: String,
    #[validate(length(min = 6))]
    pub password: String,
    pub admin_secret_key: String,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct FcmTokenRequest {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let mut u = User::new("9876543210".into(), "Asha".into(), None, Role::User);
        u.id = Some(ObjectId::new());
        u
    }

    #[test]
    fn phone_format() {
        assert!(validate_phone("9876543210").is_ok());
        assert!(validate_phone("5876543210").is_err());
        assert!(validate_phone("987654321").is_err());
        assert!(validate_phone("+919876543210").is_err());
    }

    #[test]
    fn referral_code_is_id_suffix() {
        let id = ObjectId::parse_str("65f1c2a9e4b0a1b2c3d4e5f6").unwrap();
        assert_eq!(referral_code_for(&id), "D4E5F6");
    }

    #[test]
    fn referral_rewards_both_sides_once() {
        let mut newcomer = user();
        let mut referrer = user();

        apply_referral(&mut newcomer, &mut referrer).unwrap();
        assert_eq!(newcomer.wallet, NEW_USER_REFERRAL_BONUS);
        assert_eq!(referrer.wallet, REFERRER_BONUS);
        assert_eq!(newcomer.referred_by, referrer.id);

        let err = apply_referral(&mut newcomer, &mut referrer).unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
        assert_eq!(newcomer.wallet, NEW_USER_REFERRAL_BONUS);
    }

    #[test]
    fn own_code_is_refused() {
        let mut me = user();
        let mut same = me.clone();
        let err = apply_referral(&mut me, &mut same).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(me.wallet, 0.0);
    }

    #[test]
    fn profile_hides_password() {
        let mut u = user();
        u.password_hash = Some("$2b$12$hash".into());
        let json = serde_json::to_value(UserProfile::from(&u)).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["role"], "user");
    }
}
