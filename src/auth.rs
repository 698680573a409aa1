use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ok, ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, errors::Error as JwtError, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::Settings;
use crate::error::{ApiError, ApiResult};
use crate::models::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,     // User ID
    pub role: Role,
    pub exp: i64,        // Expiration time
    pub iat: i64,        // Issued at
}

pub fn hash_password(password: &str) -> ApiResult<String> {
    hash(password.as_bytes(), DEFAULT_COST).map_err(|e| {
        error!("Failed to hash password: {}", e);
        ApiError::Internal("Password hashing failed".into())
    })
}

pub fn verify_password(password: &str, password_hash: &str) -> ApiResult<bool> {
    verify(password, password_hash).map_err(|e| {
        error!("Password verification error: {}", e);
        ApiError::Internal("Password verification failed".into())
    })
}

pub fn issue_token(user_id: &ObjectId, role: Role, settings: &Settings) -> ApiResult<String> {
    let now = Utc::now();
    let ttl_days = match role {
        Role::Admin => settings.admin_jwt_ttl_days,
        Role::User => settings.jwt_ttl_days,
    };

    let claims = Claims {
        sub: user_id.to_hex(),
        role,
        exp: (now + Duration::days(ttl_days)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Token generation error: {}", e);
        ApiError::Internal("Token generation failed".into())
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn bearer_token(req: &HttpRequest) -> ApiResult<&str> {
    let header = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| ApiError::Unauthorized("Not authorized to access this route".into()))?;

    let value = header
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Invalid authorization header".into()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization header format".into()))
}

/// Claims for the current request: cached by `AuthMiddleware` or decoded
/// from the header for routes outside a protected scope.
fn request_claims(req: &HttpRequest) -> ApiResult<Claims> {
    if let Some(claims) = req.extensions().get::<Claims>() {
        return Ok(claims.clone());
    }

    let settings = req
        .app_data::<web::Data<Settings>>()
        .ok_or_else(|| ApiError::Internal("settings not registered".into()))?;
    let token = bearer_token(req)?;

    verify_token(token, &settings.jwt_secret).map_err(|e| {
        debug!("Token verification error: {}", e);
        ApiError::Unauthorized("Not authorized to access this route".into())
    })
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub role: Role,
}

impl AuthUser {
    fn from_claims(claims: Claims) -> ApiResult<Self> {
        let id = ObjectId::parse_str(&claims.sub)
            .map_err(|_| ApiError::Unauthorized("Invalid token subject".into()))?;
        Ok(AuthUser { id, role: claims.role })
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(request_claims(req).and_then(AuthUser::from_claims))
    }
}

/// An authenticated caller holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl FromRequest for AdminUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let result = request_claims(req)
            .and_then(AuthUser::from_claims)
            .and_then(|user| match user.role {
                Role::Admin => Ok(AdminUser(user)),
                Role::User => Err(ApiError::Forbidden("Access denied. Admin only.".into())),
            });
        ready(result)
    }
}

// Auth middleware implementation
pub struct AuthMiddleware;

impl Default for AuthMiddleware {
    fn default() -> Self {
        AuthMiddleware
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService { service })
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        match request_claims(req.request()) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
                let fut = self.service.call(req);
                Box::pin(async move { fut.await })
            }
            Err(e) => Box::pin(async move { Err(e.into()) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, App, HttpResponse};

    fn settings() -> Settings {
        Settings::for_tests()
    }

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().body(user.id.to_hex())
    }

    async fn admin_only(_admin: AdminUser) -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[test]
    fn token_round_trip_keeps_role() {
        let s = settings();
        let id = ObjectId::new();
        let token = issue_token(&id, Role::Admin, &s).unwrap();
        let claims = verify_token(&token, &s.jwt_secret).unwrap();
        assert_eq!(claims.sub, id.to_hex());
        assert_eq!(claims.role, Role::Admin);
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn password_hash_verifies() {
        let hashed = hash_password("s3cret!").unwrap();
        assert!(verify_password("s3cret!", &hashed).unwrap());
        assert!(!verify_password("wrong", &hashed).unwrap());
    }

    #[actix_web::test]
    async fn middleware_guards_scope() {
        let s = settings();
        let id = ObjectId::new();
        let token = issue_token(&id, Role::User, &s).unwrap();

        let app = actix_test::init_service(
            App::new().app_data(web::Data::new(s)).service(
                web::scope("/me")
                    .wrap(AuthMiddleware)
                    .route("", web::get().to(whoami)),
            ),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/me").to_request();
        let resp = actix_test::try_call_service(&app, req).await;
        let status = match resp {
            Ok(resp) => resp.status(),
            Err(e) => e.as_response_error().status_code(),
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = actix_test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body = actix_test::call_and_read_body(&app, req).await;
        assert_eq!(body, id.to_hex().as_bytes());
    }

    #[actix_web::test]
    async fn admin_extractor_checks_role() {
        let s = settings();
        let user_token = issue_token(&ObjectId::new(), Role::User, &s).unwrap();
        let admin_token = issue_token(&ObjectId::new(), Role::Admin, &s).unwrap();

        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(s))
                .route("/admin", web::get().to(admin_only)),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/admin")
            .insert_header(("Authorization", format!("Bearer {}", user_token)))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = actix_test::TestRequest::get()
            .uri("/admin")
            .insert_header(("Authorization", format!("Bearer {}", admin_token)))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get()
            .uri("/admin")
            .insert_header(("Authorization", "Token abc"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
