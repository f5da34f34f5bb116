// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use crate::errors::AuthError;

/// A signed token and its expiration, as stamped into a path segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token: String,
    pub expires_at: SystemTime,
}

impl Token {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at <= now
    }

    /// Checks a token string and expiration pair the way chain elements see
    /// them on the wire.
    pub fn validate(token: &str, expires_at: Option<SystemTime>) -> Result<(), AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        match expires_at {
            Some(t) if t <= SystemTime::now() => Err(AuthError::TokenExpired),
            _ => Ok(()),
        }
    }
}

/// Issues tokens for path segments. Implementations are opaque to the chain;
/// tests substitute fixed-TTL fakes.
pub trait TokenProvider: Send + Sync {
    fn generate(&self, peer: &str) -> Result<Token, AuthError>;
}
