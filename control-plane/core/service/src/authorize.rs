// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Policy evaluation gate.

use std::sync::Arc;
use std::time::SystemTime;

use tonic::{Status, async_trait};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest, Path};
use weft_registry::clock::from_timestamp;

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

/// Evaluated against the connection path before the request may descend.
pub trait Policy: Send + Sync {
    fn check(&self, path: &Path) -> Result<(), Status>;
}

/// Allows everything.
pub struct AllowAny;

impl Policy for AllowAny {
    fn check(&self, _path: &Path) -> Result<(), Status> {
        Ok(())
    }
}

/// Requires every stamped segment to carry a non-empty, unexpired token.
pub struct ValidTokens;

impl Policy for ValidTokens {
    fn check(&self, path: &Path) -> Result<(), Status> {
        let now = SystemTime::now();
        for segment in &path.path_segments {
            if segment.token.is_empty() {
                return Err(Status::permission_denied(format!(
                    "segment {} carries no token",
                    segment.name
                )));
            }
            if let Some(expires) = segment.expires.as_ref().and_then(from_timestamp) {
                if expires <= now {
                    return Err(Status::permission_denied(format!(
                        "token of segment {} expired",
                        segment.name
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn any() -> Arc<dyn Policy> {
    Arc::new(AllowAny)
}

pub fn valid_tokens() -> Arc<dyn Policy> {
    Arc::new(ValidTokens)
}

/// The authorization stage.
pub struct Authorize {
    policy: Arc<dyn Policy>,
}

impl Authorize {
    pub fn new(policy: Arc<dyn Policy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl NetworkServiceStage for Authorize {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        if let Some(path) = request.connection.as_ref().and_then(|c| c.path.as_ref()) {
            self.policy.check(path)?;
        }
        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        if let Some(path) = conn.path.as_ref() {
            self.policy.check(path)?;
        }
        next.close(ctx, conn).await
    }
}
