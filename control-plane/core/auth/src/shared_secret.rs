// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, SystemTime};

use base64::prelude::*;
use rand::Rng;

use crate::errors::AuthError;
use crate::traits::{Token, TokenProvider};

/// Issues opaque tokens derived from a shared secret, valid for a fixed TTL.
#[derive(Debug, Clone)]
pub struct SharedSecretTokenProvider {
    secret: String,
    ttl: Duration,
}

impl SharedSecretTokenProvider {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.to_string(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl TokenProvider for SharedSecretTokenProvider {
    fn generate(&self, peer: &str) -> Result<Token, AuthError> {
        if peer.is_empty() {
            return Err(AuthError::EmptyPeer);
        }

        let nonce: u64 = rand::rng().random();
        let token = BASE64_STANDARD.encode(format!("{}:{}:{:016x}", self.secret, peer, nonce));

        Ok(Token {
            token,
            expires_at: SystemTime::now() + self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let provider = SharedSecretTokenProvider::new("secret", Duration::from_secs(60));
        let token = provider.generate("nsmgr-1").unwrap();

        assert!(!token.token.is_empty());
        assert!(!token.is_expired(SystemTime::now()));
        assert!(token.is_expired(SystemTime::now() + Duration::from_secs(61)));
    }

    #[test]
    fn test_generate_rejects_empty_peer() {
        let provider = SharedSecretTokenProvider::new("secret", Duration::from_secs(60));
        assert!(matches!(provider.generate(""), Err(AuthError::EmptyPeer)));
    }

    #[test]
    fn test_tokens_are_unique() {
        let provider = SharedSecretTokenProvider::new("secret", Duration::from_secs(60));
        let a = provider.generate("peer").unwrap();
        let b = provider.generate("peer").unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_validate() {
        assert!(Token::validate("tok", None).is_ok());
        assert!(Token::validate(
            "tok",
            Some(SystemTime::now() + Duration::from_secs(10))
        )
        .is_ok());
        assert!(matches!(
            Token::validate("", None),
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            Token::validate("tok", Some(SystemTime::now() - Duration::from_secs(1))),
            Err(AuthError::TokenExpired)
        ));
    }
}
