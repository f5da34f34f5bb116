// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Convenience client chains pointed at a fixed registry URL.

use std::sync::Arc;

use futures::StreamExt;
use tonic::Status;

use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery, NetworkServiceQuery,
};
use weft_config::grpc::pool::ChannelPool;

use crate::chain::{
    NsRegistryChain, NsRegistryStage, NsResponseStream, NseRegistryChain, NseRegistryStage,
    NseResponseStream,
};
use crate::clienturl::ClientUrl;
use crate::connect::Connect;
use crate::context::RegistryContext;
use crate::refresh::Refresh;

/// Client chain for a remote NSE registry: clienturl → [refresh] → connect.
pub struct NseRegistryClient {
    chain: NseRegistryChain,
}

impl NseRegistryClient {
    pub fn new(url: &str, pool: Arc<ChannelPool>) -> Self {
        Self {
            chain: NseRegistryChain::new(vec![
                Arc::new(ClientUrl::new(url)) as Arc<dyn NseRegistryStage>,
                Arc::new(Connect::new(pool)),
            ]),
        }
    }

    /// Client that also renews leases in the background until Unregister.
    pub fn with_refresh(url: &str, pool: Arc<ChannelPool>) -> Self {
        Self {
            chain: NseRegistryChain::new(vec![
                Arc::new(ClientUrl::new(url)) as Arc<dyn NseRegistryStage>,
                Arc::new(Refresh::new()),
                Arc::new(Connect::new(pool)),
            ]),
        }
    }

    pub async fn register(
        &self,
        endpoint: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint, Status> {
        let mut ctx = RegistryContext::new();
        self.chain.register(&mut ctx, endpoint).await
    }

    pub async fn unregister(&self, endpoint: NetworkServiceEndpoint) -> Result<(), Status> {
        let mut ctx = RegistryContext::new();
        self.chain.unregister(&mut ctx, endpoint).await
    }

    pub async fn find(
        &self,
        query: NetworkServiceEndpointQuery,
    ) -> Result<NseResponseStream, Status> {
        let mut ctx = RegistryContext::new();
        self.chain.find(&mut ctx, query).await
    }

    /// Snapshot query: collects every live record matching the template.
    pub async fn find_all(
        &self,
        template: NetworkServiceEndpoint,
    ) -> Result<Vec<NetworkServiceEndpoint>, Status> {
        let mut stream = self
            .find(NetworkServiceEndpointQuery {
                network_service_endpoint: Some(template),
                watch: false,
            })
            .await?;

        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item?;
            if item.deleted {
                continue;
            }
            if let Some(endpoint) = item.network_service_endpoint {
                out.push(endpoint);
            }
        }
        Ok(out)
    }
}

/// Client chain for a remote NS registry: clienturl → connect.
pub struct NsRegistryClient {
    chain: NsRegistryChain,
}

impl NsRegistryClient {
    pub fn new(url: &str, pool: Arc<ChannelPool>) -> Self {
        Self {
            chain: NsRegistryChain::new(vec![
                Arc::new(ClientUrl::new(url)) as Arc<dyn NsRegistryStage>,
                Arc::new(Connect::new(pool)),
            ]),
        }
    }

    pub async fn register(&self, service: NetworkService) -> Result<NetworkService, Status> {
        let mut ctx = RegistryContext::new();
        self.chain.register(&mut ctx, service).await
    }

    pub async fn unregister(&self, service: NetworkService) -> Result<(), Status> {
        let mut ctx = RegistryContext::new();
        self.chain.unregister(&mut ctx, service).await
    }

    pub async fn find(&self, query: NetworkServiceQuery) -> Result<NsResponseStream, Status> {
        let mut ctx = RegistryContext::new();
        self.chain.find(&mut ctx, query).await
    }

    pub async fn find_all(
        &self,
        template: NetworkService,
    ) -> Result<Vec<NetworkService>, Status> {
        let mut stream = self
            .find(NetworkServiceQuery {
                network_service: Some(template),
                watch: false,
            })
            .await?;

        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item?;
            if item.deleted {
                continue;
            }
            if let Some(service) = item.network_service {
                out.push(service);
            }
        }
        Ok(out)
    }
}
