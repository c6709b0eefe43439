use std::str::FromStr;
use std::time::Duration;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use venbill_core::access::Actor;
use venbill_core::types::{Role, User};

use crate::problem::ApiError;

/// Issues and validates bearer session tokens (HS256).
///
/// The session context is rebuilt from the token on every request; no
/// actor state lives outside the request.
#[derive(Clone)]
pub struct SessionKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_aud = false;
        // Expiry is checked against the injectable clock below.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_secs: ttl.as_secs() as i64,
        }
    }

    /// Issues a token for an authenticated user.
    pub fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: user.id.clone(),
            role: user.role.as_str().to_string(),
            vendor_id: user.vendor_id.clone(),
            exp: (now.timestamp() + self.ttl_secs) as usize,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| SessionError::Encode(err.to_string()))
    }

    /// Builds the per-request actor from the `Authorization` header.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<Actor, SessionError> {
        let raw = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(SessionError::MissingToken)?;
        let token = raw.strip_prefix("Bearer ").ok_or(SessionError::MissingToken)?;

        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| SessionError::Invalid(err.to_string()))?;
        let claims = data.claims;

        if now.timestamp() >= claims.exp as i64 {
            return Err(SessionError::Invalid("token_expired".to_string()));
        }

        let role = Role::from_str(&claims.role)
            .map_err(|_| SessionError::Invalid("unknown_role".to_string()))?;

        Ok(Actor {
            user_id: claims.sub,
            role,
            vendor_id: claims.vendor_id,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    pub exp: usize,
}

/// Hashes a password with Argon2id and a per-hash random salt, returning
/// the PHC string form.
pub fn hash_password(password: &str) -> Result<String, SessionError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| SessionError::Crypto(err.to_string()))
}

/// Verifies a plaintext password against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch; only a malformed stored hash is an
/// error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, SessionError> {
    let parsed = PasswordHash::new(hash).map_err(|err| SessionError::Crypto(err.to_string()))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(SessionError::Crypto(err.to_string())),
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("failed to issue token: {0}")]
    Encode(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Encode(_) | SessionError::Crypto(_) => ApiError::storage(err),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}
