//! Caller authentication

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::audit::{create_auth_event, AuditOutcome};
use crate::config::SecurityConfig;
use crate::AppState;

use super::ApiError;

/// Caller id used when authentication is disabled
pub const ANONYMOUS: &str = "anonymous";

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (caller id)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

/// Authenticated caller extracted from request
#[derive(Debug, Clone)]
pub struct Caller {
    pub caller_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let security = &state.config.security;

        match authenticate(parts, security) {
            Ok(caller_id) => Ok(Caller { caller_id }),
            Err(e) if security.require_auth => {
                state.audit_logger.log(&create_auth_event(
                    ANONYMOUS.to_string(),
                    AuditOutcome::Denied,
                    None,
                ));
                Err(e)
            }
            Err(_) => Ok(Caller {
                caller_id: ANONYMOUS.to_string(),
            }),
        }
    }
}

/// Resolve the caller id from the request headers
fn authenticate(parts: &Parts, security: &SecurityConfig) -> Result<String, ApiError> {
    let auth_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if let Some(token) = auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        return decode_jwt(token, &security.jwt_secret).map(|claims| claims.sub);
    }

    let api_key = auth_header
        .and_then(|h| h.strip_prefix("ApiKey "))
        .or_else(|| parts.headers.get("X-API-Key").and_then(|h| h.to_str().ok()))
        .ok_or(ApiError::Unauthorized)?;

    validate_api_key(api_key, security)
}

/// Decode and validate a JWT token
fn decode_jwt(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    decode::<Claims>(token, &key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!(error = %e, "JWT validation failed");
            ApiError::Unauthorized
        })
}

/// Create a JWT token for a caller
pub fn create_jwt(caller_id: &str, secret: &str, expiration_secs: u64) -> Result<String, ApiError> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: caller_id.to_string(),
        exp: now + expiration_secs,
        iat: now,
    };

    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key)
        .map_err(|e| ApiError::Internal(format!("Failed to encode JWT: {}", e)))
}

/// Validate an API key and return the caller id
fn validate_api_key(api_key: &str, security: &SecurityConfig) -> Result<String, ApiError> {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    if let Some(ref admin_token) = security.admin_token {
        if api_key == admin_token {
            return Ok("admin".to_string());
        }
    }

    for (caller_id, hash) in &security.api_keys {
        if let Ok(parsed_hash) = PasswordHash::new(hash) {
            if Argon2::default()
                .verify_password(api_key.as_bytes(), &parsed_hash)
                .is_ok()
            {
                return Ok(caller_id.clone());
            }
        }
    }

    Err(ApiError::Unauthorized)
}

/// Hash an API key for storage in `security.api_keys`
pub fn hash_api_key(api_key: &str) -> Result<String, ApiError> {
    use argon2::{
        password_hash::{rand_core::OsRng, SaltString},
        Argon2, PasswordHasher,
    };

    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(api_key.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash API key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/containers");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn security() -> SecurityConfig {
        SecurityConfig {
            require_auth: true,
            jwt_secret: "0123456789abcdef0123456789abcdef".to_string(),
            admin_token: Some("admin-secret".to_string()),
            ..SecurityConfig::default()
        }
    }

    #[test]
    fn test_jwt_roundtrip() {
        let security = security();
        let token = create_jwt("builder", &security.jwt_secret, 60).unwrap();
        let bearer = format!("Bearer {}", token);

        let caller = authenticate(&parts(&[("authorization", &bearer)]), &security).unwrap();
        assert_eq!(caller, "builder");
    }

    #[test]
    fn test_jwt_with_wrong_secret_is_rejected() {
        let security = security();
        let token = create_jwt("builder", "another-secret-of-enough-length", 60).unwrap();
        let bearer = format!("Bearer {}", token);

        assert!(authenticate(&parts(&[("authorization", &bearer)]), &security).is_err());
    }

    #[test]
    fn test_admin_token_and_api_keys() {
        let mut security = security();
        security
            .api_keys
            .insert("previewer".to_string(), hash_api_key("pk-123").unwrap());

        let admin = authenticate(&parts(&[("x-api-key", "admin-secret")]), &security).unwrap();
        assert_eq!(admin, "admin");

        let caller = authenticate(&parts(&[("authorization", "ApiKey pk-123")]), &security).unwrap();
        assert_eq!(caller, "previewer");

        assert!(authenticate(&parts(&[("x-api-key", "pk-999")]), &security).is_err());
        assert!(authenticate(&parts(&[]), &security).is_err());
    }
}
