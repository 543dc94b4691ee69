//! Token verification and identity claims.
//!
//! Operator credentials are signed, time-limited JWTs (HS256) verified
//! against the process-wide secret. Verification is pure: it either yields
//! an identity claim or fails, with no side effects. The *absence* of a
//! token is a distinct case handled by callers (an anonymous or device-side
//! connection), not an authentication failure.

pub mod password;
pub mod permissions;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::storage::User;
use permissions::PermissionSet;

/// Token lifetime, matching the original deployment's one-hour sessions.
const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token not provided")]
    Missing,
    #[error("token invalid or expired")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Role carried in the token. Administrators bypass all permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Operator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }
}

/// Claims embedded in an operator token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the operator's user id.
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Granted permission set. Absent or malformed sets fail closed at the
    /// authorization gate; verification itself does not reject them.
    #[serde(default)]
    pub permissions: Option<PermissionSet>,
    pub iat: i64,
    pub exp: i64,
}

/// Identity derived from verified claims; what the authorization gate and
/// the broadcaster see.
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
    pub permissions: Option<PermissionSet>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            subject: claims.sub,
            role: claims.role,
            permissions: claims.permissions,
        }
    }
}

/// Issues and validates operator tokens against the process-wide secret.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Issue a token for a stored user.
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = now_secs();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            permissions: user.permissions.clone(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Verify signature and expiry, returning the embedded claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data =
            jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

fn now_secs() -> i64 {
    #[allow(clippy::cast_possible_wrap)]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    secs
}

/// Extract the bearer token from an Authorization header value, if any.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
