// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Token issuance for path segments.
//!
//! Tokens are opaque to the chain: every element that stamps a path segment
//! asks a [`traits::TokenProvider`] for a token and an expiration, and
//! downstream elements only ever check emptiness and expiry.

pub mod errors;
pub mod shared_secret;
pub mod traits;

pub use shared_secret::SharedSecretTokenProvider;
pub use traits::{Token, TokenProvider};
