//! Bearer-token authentication.
//!
//! Tokens are minted by the login service (or the `issue-token` binary) and
//! only validated here. A valid token becomes an [`AuthUser`] in the request
//! extensions; capability checks live in [`capabilities`].

pub mod capabilities;

pub use capabilities::{authorize, AuthRouterExt, Capability};

use crate::entities::UserRole;
use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: UserRole,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn can(&self, capability: Capability) -> bool {
        authorize(self.role, capability).is_ok()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))
    }
}

#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    issuer: String,
    expiration: ChronoDuration,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, issuer: impl Into<String>, expiration_secs: i64) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer: issuer.into(),
            expiration: ChronoDuration::seconds(expiration_secs),
        }
    }

    pub fn from_config(cfg: &crate::config::AppConfig) -> Self {
        Self::new(
            cfg.jwt_secret.clone(),
            cfg.jwt_issuer.clone(),
            cfg.jwt_expiration as i64,
        )
    }

    /// Mints an access token for an already authenticated user.
    pub fn issue_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: UserRole,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.expiration).timestamp(),
            iss: self.issuer.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token creation failed: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServiceError::Unauthorized("Token expired".to_string())
            }
            _ => ServiceError::Unauthorized("Invalid token".to_string()),
        })?
        .claims;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid token subject".to_string()))?;

        Ok(AuthUser {
            user_id,
            email: claims.email,
            role: claims.role,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validates the bearer token and stores the caller in the request extensions.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let Some(auth_service) = request.extensions().get::<Arc<AuthService>>().cloned() else {
        return ServiceError::InternalError("Authentication service not available".to_string())
            .into_response();
    };

    let user = match bearer_token(request.headers()) {
        Some(token) => auth_service.validate_token(token),
        None => Err(ServiceError::Unauthorized("Missing bearer token".to_string())),
    };

    match user {
        Ok(user) => {
            debug!(user_id = %user.user_id, role = ?user.role, "Authenticated request");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("a_sufficiently_long_and_varied_jwt_secret", "agrimart-api", 3600)
    }

    #[test]
    fn issued_token_round_trips() {
        let auth = service();
        let user_id = Uuid::new_v4();
        let token = auth
            .issue_token(user_id, "farmer@example.com", UserRole::Customer)
            .unwrap();

        let user = auth.validate_token(&token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.role, UserRole::Customer);
        assert!(!user.is_admin());
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let other = AuthService::new("a_completely_different_signing_secret!!", "agrimart-api", 3600);
        let token = other
            .issue_token(Uuid::new_v4(), "x@example.com", UserRole::Admin)
            .unwrap();
        assert!(matches!(
            service().validate_token(&token),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let auth = AuthService::new("a_sufficiently_long_and_varied_jwt_secret", "agrimart-api", -3600);
        let token = auth
            .issue_token(Uuid::new_v4(), "x@example.com", UserRole::Customer)
            .unwrap();
        assert!(matches!(
            auth.validate_token(&token),
            Err(ServiceError::Unauthorized(msg)) if msg == "Token expired"
        ));
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
