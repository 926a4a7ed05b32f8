//! Token validation seam.
//!
//! Token issuance lives outside this crate. The broker only needs something
//! that turns a token into a user id, possibly over the network.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// An authenticated user identifier.
pub type UserId = String;

/// Authentication errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Token is unknown or malformed.
    #[error("Invalid token")]
    InvalidToken,

    /// Token was valid but has expired.
    #[error("Token expired")]
    Expired,

    /// Validation backend could not be reached.
    #[error("Authentication unavailable: {0}")]
    Unavailable(String),
}

/// Validates client tokens.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to the user it was issued for.
    async fn validate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Authenticator backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuthenticator {
    /// Create an authenticator from `(token, user)` pairs.
    #[must_use]
    pub fn new<I, T, U>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<UserId>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(t, u)| (t.into(), u.into()))
                .collect(),
        }
    }

    /// Get the number of known tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if no tokens are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}
