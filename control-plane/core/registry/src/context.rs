// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use tokio_util::sync::CancellationToken;

/// Per-call state flowing through a registry chain.
///
/// The target URL slot is written by `clienturl` (or an interdomain stage)
/// and read by `connect` downstream; it is never global.
#[derive(Debug, Clone, Default)]
pub struct RegistryContext {
    /// Cancels the call and everything it spawned downstream.
    pub cancel: CancellationToken,
    /// Target URL for the downstream connect stage.
    pub client_url: Option<String>,
}

impl RegistryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            client_url: None,
        }
    }
}
