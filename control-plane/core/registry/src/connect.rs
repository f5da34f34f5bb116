// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Terminal stage forwarding registry calls to the remote registry at the
//! URL carried in the per-call context, over pooled channels.

use std::sync::Arc;

use tonic::{Status, async_trait};

use weft_api::registry::v1::network_service_endpoint_registry_client::NetworkServiceEndpointRegistryClient;
use weft_api::registry::v1::network_service_registry_client::NetworkServiceRegistryClient;
use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery, NetworkServiceQuery,
};
use weft_config::grpc::pool::ChannelPool;

use crate::chain::{
    NsNext, NsRegistryStage, NsResponseStream, NseNext, NseRegistryStage, NseResponseStream,
};
use crate::context::RegistryContext;

/// Connects to the remote registry named by the context URL. The channel
/// pool multiplexes every call to the same URL over one physical connection
/// and disposes it after the idle grace period.
#[derive(Clone)]
pub struct Connect {
    pool: Arc<ChannelPool>,
}

impl Connect {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self { pool }
    }

    fn channel(&self, ctx: &RegistryContext) -> Result<tonic::transport::Channel, Status> {
        let url = ctx
            .client_url
            .as_deref()
            .ok_or_else(|| Status::invalid_argument("no target URL in context"))?;
        self.pool
            .checkout(url)
            .map_err(|e| Status::invalid_argument(e.to_string()))
    }
}

#[async_trait]
impl NsRegistryStage for Connect {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        _next: NsNext,
    ) -> Result<NetworkService, Status> {
        let mut client = NetworkServiceRegistryClient::new(self.channel(ctx)?);
        tokio::select! {
            res = client.register(service) => Ok(res?.into_inner()),
            _ = ctx.cancel.cancelled() => Err(Status::cancelled("register cancelled")),
        }
    }

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
        _next: NsNext,
    ) -> Result<NsResponseStream, Status> {
        let mut client = NetworkServiceRegistryClient::new(self.channel(ctx)?);
        let stream = tokio::select! {
            res = client.find(query) => res?.into_inner(),
            _ = ctx.cancel.cancelled() => return Err(Status::cancelled("find cancelled")),
        };
        Ok(Box::pin(stream))
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        _next: NsNext,
    ) -> Result<(), Status> {
        let mut client = NetworkServiceRegistryClient::new(self.channel(ctx)?);
        tokio::select! {
            res = client.unregister(service) => res.map(|_| ()).map_err(Into::into),
            _ = ctx.cancel.cancelled() => Err(Status::cancelled("unregister cancelled")),
        }
    }
}

#[async_trait]
impl NseRegistryStage for Connect {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        _next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status> {
        let mut client = NetworkServiceEndpointRegistryClient::new(self.channel(ctx)?);
        tokio::select! {
            res = client.register(endpoint) => Ok(res?.into_inner()),
            _ = ctx.cancel.cancelled() => Err(Status::cancelled("register cancelled")),
        }
    }

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
        _next: NseNext,
    ) -> Result<NseResponseStream, Status> {
        let mut client = NetworkServiceEndpointRegistryClient::new(self.channel(ctx)?);
        let stream = tokio::select! {
            res = client.find(query) => res?.into_inner(),
            _ = ctx.cancel.cancelled() => return Err(Status::cancelled("find cancelled")),
        };
        Ok(Box::pin(stream))
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        _next: NseNext,
    ) -> Result<(), Status> {
        let mut client = NetworkServiceEndpointRegistryClient::new(self.channel(ctx)?);
        tokio::select! {
            res = client.unregister(endpoint) => res.map(|_| ()).map_err(Into::into),
            _ = ctx.cancel.cancelled() => Err(Status::cancelled("unregister cancelled")),
        }
    }
}
