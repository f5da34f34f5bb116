// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! tonic adapters exposing registry chains as gRPC services.

use tonic::{Request, Response, Status};

use weft_api::registry::v1::network_service_endpoint_registry_server::{
    NetworkServiceEndpointRegistry, NetworkServiceEndpointRegistryServer,
};
use weft_api::registry::v1::network_service_registry_server::{
    NetworkServiceRegistry, NetworkServiceRegistryServer,
};
use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery, NetworkServiceQuery,
};

use crate::chain::{NsRegistryChain, NsResponseStream, NseRegistryChain, NseResponseStream};
use crate::context::RegistryContext;

/// gRPC surface of an NS registry chain.
pub struct GrpcNsRegistry {
    chain: NsRegistryChain,
}

impl GrpcNsRegistry {
    pub fn new(chain: NsRegistryChain) -> Self {
        Self { chain }
    }

    pub fn into_service(self) -> NetworkServiceRegistryServer<Self> {
        NetworkServiceRegistryServer::new(self)
    }
}

#[tonic::async_trait]
impl NetworkServiceRegistry for GrpcNsRegistry {
    async fn register(
        &self,
        request: Request<NetworkService>,
    ) -> Result<Response<NetworkService>, Status> {
        let mut ctx = RegistryContext::new();
        let out = self.chain.register(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(out))
    }

    type FindStream = NsResponseStream;

    async fn find(
        &self,
        request: Request<NetworkServiceQuery>,
    ) -> Result<Response<Self::FindStream>, Status> {
        let mut ctx = RegistryContext::new();
        let stream = self.chain.find(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(stream))
    }

    async fn unregister(
        &self,
        request: Request<NetworkService>,
    ) -> Result<Response<()>, Status> {
        let mut ctx = RegistryContext::new();
        self.chain.unregister(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(()))
    }
}

/// gRPC surface of an NSE registry chain.
pub struct GrpcNseRegistry {
    chain: NseRegistryChain,
}

impl GrpcNseRegistry {
    pub fn new(chain: NseRegistryChain) -> Self {
        Self { chain }
    }

    pub fn into_service(self) -> NetworkServiceEndpointRegistryServer<Self> {
        NetworkServiceEndpointRegistryServer::new(self)
    }
}

#[tonic::async_trait]
impl NetworkServiceEndpointRegistry for GrpcNseRegistry {
    async fn register(
        &self,
        request: Request<NetworkServiceEndpoint>,
    ) -> Result<Response<NetworkServiceEndpoint>, Status> {
        let mut ctx = RegistryContext::new();
        let out = self.chain.register(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(out))
    }

    type FindStream = NseResponseStream;

    async fn find(
        &self,
        request: Request<NetworkServiceEndpointQuery>,
    ) -> Result<Response<Self::FindStream>, Status> {
        let mut ctx = RegistryContext::new();
        let stream = self.chain.find(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(stream))
    }

    async fn unregister(
        &self,
        request: Request<NetworkServiceEndpoint>,
    ) -> Result<Response<()>, Status> {
        let mut ctx = RegistryContext::new();
        self.chain.unregister(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(()))
    }
}
