// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call state flowing through a network service chain.
///
/// Continuation data never lives in globals: the target URL slot is written
/// by `clienturl` (or `discover`) and read by `connect`; the reissue tag
/// marks re-Requests originated by `heal`/`refresh` so they do not re-arm
/// their own monitors.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Cancels the call and everything it spawned downstream.
    pub cancel: CancellationToken,
    /// Absolute deadline for the downstream request, if any.
    pub deadline: Option<Instant>,
    /// Target URL for the downstream connect stage.
    pub client_url: Option<String>,
    /// True when this call re-enters the chain from a monitor task.
    pub reissue: bool,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    /// Context for a re-Request driven by a monitor task.
    pub fn reissue(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            reissue: true,
            ..Self::default()
        }
    }
}
