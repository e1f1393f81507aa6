//! The service provider interface for authentication.
//!
//! Token issuance, TOTP and device-code flows live in an external collaborator; libhaven only
//! consumes the interface defined here: a bearer credential is exchanged for [`Claims`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The authenticated principal attached to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user id.
    pub user_id: String,
    /// Display username.
    pub username: String,
    /// Whether the user holds server-wide administrative rights.
    pub is_admin: bool,
}

impl Claims {
    /// Convenience constructor for a regular user.
    pub fn user(id: impl Into<String>) -> Claims {
        let id = id.into();
        Claims {
            username: id.clone(),
            user_id: id,
            is_admin: false,
        }
    }

    /// Convenience constructor for an administrator.
    pub fn admin(id: impl Into<String>) -> Claims {
        let id = id.into();
        Claims {
            username: id.clone(),
            user_id: id,
            is_admin: true,
        }
    }
}

/// Async verifier interface for bearer credentials.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Validates the given bearer token and returns the claims it carries.
    async fn verify(&self, token: &str) -> Result<Claims, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug)]
pub(crate) struct UnknownTokenError;

impl fmt::Display for UnknownTokenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown token")
    }
}

impl std::error::Error for UnknownTokenError {}

/// A [`TokenVerifier`] over a fixed token table. Useful for tests and single-box deployments;
/// production setups verify against the external identity service instead.
#[derive(Debug, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Claims>,
}

impl StaticTokens {
    /// Creates an empty table.
    pub fn new() -> StaticTokens {
        StaticTokens::default()
    }

    /// Adds a token and the claims it resolves to.
    pub fn with_token(mut self, token: impl Into<String>, claims: Claims) -> StaticTokens {
        self.tokens.insert(token.into(), claims);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokens {
    async fn verify(&self, token: &str) -> Result<Claims, Box<dyn std::error::Error + Send + Sync>> {
        self.tokens.get(token).cloned().ok_or_else(|| Box::new(UnknownTokenError) as _)
    }
}
