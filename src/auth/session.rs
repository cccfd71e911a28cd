//! JWT session token creation and verification (HS256).

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::User;
use crate::errors::Error;

/// JWT session claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,   // User ID
    pub email: String, // User email
    pub iat: i64,      // Issued at
    pub exp: i64,      // Expiration time
}

/// Signing key plus token lifetime
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        SessionKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Create a JWT token for a user session
    pub fn create_token(&self, user: &User) -> Result<String, Error> {
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now + self.ttl.as_secs() as i64,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| Error::Other(anyhow::anyhow!("create JWT: {e}")))
    }

    /// Verify and decode a JWT session token
    pub fn verify_token(&self, token: &str) -> Result<SessionClaims, Error> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let data = decode::<SessionClaims>(token.trim(), &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::InvalidKeyFormat | ErrorKind::Crypto(_) => {
                Error::Other(anyhow::anyhow!("JWT verification: {e}"))
            }
            ErrorKind::ExpiredSignature => Error::Unauthenticated {
                message: Some("Session expired".to_string()),
            },
            _ => Error::Unauthenticated {
                message: Some("Invalid session token".to_string()),
            },
        })?;

        Ok(data.claims)
    }
}
