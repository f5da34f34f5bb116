// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Annotates the per-call context with a fixed target URL, read by the
//! connect stage downstream. Keeping the URL out of the connect stage itself
//! is what lets different chains plug different targets at different
//! positions.

use tonic::{Status, async_trait};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

#[derive(Debug, Clone)]
pub struct ClientUrl {
    url: String,
}

impl ClientUrl {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl NetworkServiceStage for ClientUrl {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        ctx.client_url = Some(self.url.clone());
        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        ctx.client_url = Some(self.url.clone());
        next.close(ctx, conn).await
    }
}
