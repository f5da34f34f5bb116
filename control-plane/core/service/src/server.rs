// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! tonic adapter exposing a chain as the NetworkService gRPC service.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use weft_api::networkservice::v1::network_service_server::{
    NetworkService, NetworkServiceServer,
};
use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::chain::Chain;
use crate::context::CallContext;

pub struct GrpcNetworkService {
    chain: Arc<Chain>,
}

impl GrpcNetworkService {
    pub fn new(chain: Arc<Chain>) -> Self {
        Self { chain }
    }

    pub fn into_service(self) -> NetworkServiceServer<Self> {
        NetworkServiceServer::new(self)
    }
}

#[tonic::async_trait]
impl NetworkService for GrpcNetworkService {
    async fn request(
        &self,
        request: Request<NetworkServiceRequest>,
    ) -> Result<Response<Connection>, Status> {
        let mut ctx = CallContext::new();
        let conn = self.chain.request(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(conn))
    }

    async fn close(&self, request: Request<Connection>) -> Result<Response<()>, Status> {
        let mut ctx = CallContext::new();
        self.chain.close(&mut ctx, request.into_inner()).await?;
        Ok(Response::new(()))
    }
}
