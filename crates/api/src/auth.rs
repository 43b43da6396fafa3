//! Bearer-token and shared-secret authentication.
//!
//! Handlers opt in by taking one of the extractors:
//! - [`AuthUser`]: any valid, non-revoked user token
//! - [`AdminUser`]: a user token with the `admin` role
//! - [`InternalCaller`]: the `X-Internal-Secret` header, for
//!   service-to-service routes

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use common::UserId;
use domain::Role;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use saga::INTERNAL_SECRET_HEADER;
use serde::{Deserialize, Serialize};
use store::UserStore;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

/// Access-token claims. Decoding fails on any missing or mistyped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: UserId,
    pub role: Role,
    pub token_version: i64,
    pub exp: i64,
}

/// Mints an HS256 token. Used by tests and local tooling; logins live
/// in the user service.
pub fn issue_token(
    user_id: UserId,
    role: Role,
    token_version: i64,
    secret: &str,
    ttl: Duration,
) -> Result<String, ApiError> {
    let claims = Claims {
        user_id,
        role,
        token_version,
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("token encoding failed: {e}")))
}

fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| ApiError::Unauthorized(format!("invalid token: {e}")))
}

/// What the extractors need from application state.
#[derive(Clone)]
pub struct AuthContext {
    jwt_secret: Arc<str>,
    internal_secret: Arc<str>,
    users: Arc<dyn UserStore>,
}

impl AuthContext {
    pub fn new(jwt_secret: &str, internal_secret: &str, users: Arc<dyn UserStore>) -> Self {
        Self {
            jwt_secret: Arc::from(jwt_secret),
            internal_secret: Arc::from(internal_secret),
            users,
        }
    }
}

/// An authenticated end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub role: Role,
}

impl<S> FromRequestParts<S> for AuthUser
where
    AuthContext: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_ref(state);

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let claims = decode_token(token.trim(), &auth.jwt_secret)?;

        // Logging out everywhere bumps the stored version.
        let current = auth
            .users
            .token_version(claims.user_id)
            .await
            .map_err(|e| ApiError::Internal(format!("token version lookup failed: {e}")))?;
        if current != Some(claims.token_version) {
            return Err(ApiError::Unauthorized("token has been revoked".to_string()));
        }

        Ok(AuthUser {
            user_id: claims.user_id,
            role: claims.role,
        })
    }
}

/// An authenticated user with the `admin` role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    AuthContext: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            return Err(ApiError::Forbidden("admin role required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// A peer service presenting the shared internal secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCaller;

impl<S> FromRequestParts<S> for InternalCaller
where
    AuthContext: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_ref(state);
        let presented = parts
            .headers
            .get(INTERNAL_SECRET_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("missing internal secret".to_string()))?;

        if !secrets_match(presented.as_bytes(), auth.internal_secret.as_bytes()) {
            return Err(ApiError::Forbidden("invalid internal secret".to_string()));
        }
        Ok(InternalCaller)
    }
}

fn secrets_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.ct_eq(expected).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-jwt-secret";

    #[test]
    fn test_token_round_trip() {
        let user_id = UserId::new();
        let token = issue_token(user_id, Role::Admin, 3, SECRET, Duration::minutes(5)).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.token_version, 3);
    }

    #[test]
    fn test_wrong_secret_and_expiry_rejected() {
        let token = issue_token(UserId::new(), Role::User, 1, SECRET, Duration::minutes(5)).unwrap();
        assert!(matches!(
            decode_token(&token, "other-secret"),
            Err(ApiError::Unauthorized(_))
        ));

        let expired =
            issue_token(UserId::new(), Role::User, 1, SECRET, Duration::minutes(-10)).unwrap();
        assert!(matches!(
            decode_token(&expired, SECRET),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_untyped_claims_fail_closed() {
        #[derive(Serialize)]
        struct Loose {
            #[serde(rename = "userId")]
            user_id: String,
            role: String,
            exp: i64,
        }
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Loose {
                user_id: "not-a-uuid".to_string(),
                role: "superuser".to_string(),
                exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            decode_token(&token, SECRET),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match(b"secret", b"secret"));
        assert!(!secrets_match(b"secret", b"secreT"));
        assert!(!secrets_match(b"secret", b"secret2"));
        assert!(!secrets_match(b"", b"secret"));
    }
}
