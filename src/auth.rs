//! JWT session tokens and request authentication.
//!
//! Tokens are signed at OAuth sign-in and carry the user's id, email and
//! admin flag. Handlers opt into authentication through the `AuthUser` and
//! `AdminUser` extractors rather than middleware, so the requirement is
//! visible in each handler's signature.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::User;
use crate::errors::AppError;
use crate::routes::AppState;

/// Session token lifetime: seven days.
const TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 7;

/// Claims embedded in a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub email_address: Option<String>,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Signs and verifies session tokens with a shared HS256 secret.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        let secret_bytes = secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret_bytes),
            decoding_key: DecodingKey::from_secret(secret_bytes),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issue a session token for a signed-in user.
    pub fn sign(&self, user: &User) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            email_address: user.email_address.clone(),
            is_admin: user.is_admin,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(TOKEN_TTL_SECS)).timestamp(),
        };
        self.sign_claims(&claims)
    }

    fn sign_claims(&self, claims: &Claims) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AppError::InternalError(format!("Failed to sign token: {}", e)))
    }

    /// Verify a bearer token and return its claims.
    ///
    /// Any verification failure (bad signature, expired, malformed) maps to
    /// the same 401 the original served for a rejected token.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::error!("Failed to decode bearer token: {}", e);
                AppError::Unauthorized("Bearer token has expired".to_string())
            })
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid bearer token".to_string()))
}

/// Extractor for any authenticated user.
pub struct AuthUser(pub Claims);

/// Extractor for authenticated admins. Rejects non-admins with 403.
pub struct AdminUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let claims = state.jwt.verify(token)?;
        Ok(AuthUser(claims))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(claims) = AuthUser::from_request_parts(parts, state).await?;
        if !claims.is_admin {
            tracing::error!(
                "{} is not an admin but is trying to execute {}",
                claims
                    .email_address
                    .as_deref()
                    .unwrap_or("<no email address>"),
                parts.uri
            );
            return Err(AppError::Forbidden(
                "Admin privileges required to execute this API".to_string(),
            ));
        }
        Ok(AdminUser(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn make_user(is_admin: bool) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            strava_id: 12345,
            first_name: Some("Kilian".to_string()),
            last_name: Some("Jornet".to_string()),
            email_address: Some("kilian@example.com".to_string()),
            avatar_url: None,
            is_admin,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let service = JwtService::new("super-secret-test-key");
        let user = make_user(true);

        let token = service.sign(&user).unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email_address.as_deref(), Some("kilian@example.com"));
        assert!(claims.is_admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let signer = JwtService::new("secret-a");
        let verifier = JwtService::new("secret-b");
        let token = signer.sign(&make_user(false)).unwrap();

        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let service = JwtService::new("super-secret-test-key");
        let past = Utc::now() - Duration::days(8);
        let claims = Claims {
            sub: Uuid::new_v4(),
            email_address: None,
            is_admin: false,
            iat: past.timestamp(),
            exp: (past + Duration::seconds(TOKEN_TTL_SECS)).timestamp(),
        };
        let token = service.sign_claims(&claims).unwrap();

        assert!(service.verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let service = JwtService::new("super-secret-test-key");
        assert!(service.verify("not-a-jwt").is_err());
    }

    #[test]
    fn test_bearer_token_present() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_missing_header() {
        let headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn test_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn test_bearer_token_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());
    }
}
