// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use tonic::{Status, async_trait};

use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery, NetworkServiceQuery,
};

use crate::chain::{
    NsNext, NsRegistryStage, NsResponseStream, NseNext, NseRegistryStage, NseResponseStream,
};
use crate::context::RegistryContext;

/// Annotates the per-call context with a fixed target URL for the downstream
/// connect stage.
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
impl NsRegistryStage for ClientUrl {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<NetworkService, Status> {
        ctx.client_url = Some(self.url.clone());
        next.register(ctx, service).await
    }

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
        next: NsNext,
    ) -> Result<NsResponseStream, Status> {
        ctx.client_url = Some(self.url.clone());
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<(), Status> {
        ctx.client_url = Some(self.url.clone());
        next.unregister(ctx, service).await
    }
}

#[async_trait]
impl NseRegistryStage for ClientUrl {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status> {
        ctx.client_url = Some(self.url.clone());
        next.register(ctx, endpoint).await
    }

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
        next: NseNext,
    ) -> Result<NseResponseStream, Status> {
        ctx.client_url = Some(self.url.clone());
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<(), Status> {
        ctx.client_url = Some(self.url.clone());
        next.unregister(ctx, endpoint).await
    }
}
