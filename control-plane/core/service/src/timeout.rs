// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Endpoint-side eviction of unrefreshed connections.
//!
//! Arms a timer at the previous path segment's token expiry (the client's
//! lease on this connection). A refresh re-arms it; if it fires, the stage
//! closes the rest of the chain with a background context to release
//! per-connection state downstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tonic::{Status, async_trait};
use tracing::{debug, warn};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};
use weft_registry::clock::from_timestamp;

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

#[derive(Default)]
pub struct Timeout {
    timers: Mutex<HashMap<String, CancellationToken>>,
}

impl Timeout {
    pub fn new() -> Self {
        Self::default()
    }

    fn previous_expiry(conn: &Connection) -> Option<SystemTime> {
        conn.path
            .as_ref()?
            .previous_segment()?
            .expires
            .as_ref()
            .and_then(from_timestamp)
    }

    fn stop(&self, conn_id: &str) {
        if let Some(token) = self.timers.lock().remove(conn_id) {
            token.cancel();
        }
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        for (_, token) in self.timers.lock().drain() {
            token.cancel();
        }
    }
}

#[async_trait]
impl NetworkServiceStage for Timeout {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let conn = next.request(ctx, request).await?;

        let Some(expiry) = Self::previous_expiry(&conn) else {
            return Ok(conn);
        };
        let delay = expiry
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);

        let id = conn.id.clone();
        let token = CancellationToken::new();
        if let Some(previous) = self.timers.lock().insert(id.clone(), token.clone()) {
            previous.cancel();
        }

        let tail = next.clone();
        let snapshot = conn.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    debug!(conn_id = %id, "connection expired without refresh, closing");
                    let mut ctx = CallContext::with_cancel(token.child_token());
                    if let Err(e) = tail.close(&mut ctx, snapshot).await {
                        warn!(conn_id = %id, error = %e, "expiry close failed");
                    }
                }
                _ = token.cancelled() => {}
            }
        });

        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        self.stop(&conn.id);
        next.close(ctx, conn).await
    }
}
