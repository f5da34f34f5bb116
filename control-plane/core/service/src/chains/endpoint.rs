// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The endpoint chain: the serving side of a network service.
//!
//! trace → updatepath → serialize → authorize → timeout → [additional] →
//! mechanism selection. The forwarder profile is an endpoint whose
//! additional stages loop the request back to the local NSMgr with
//! mechanism translation on the outgoing leg.

use std::sync::Arc;

use weft_auth::TokenProvider;
use weft_config::grpc::pool::ChannelPool;

use crate::authorize::{self, Authorize, Policy};
use crate::chain::{Chain, LateBound, NetworkServiceStage};
use crate::clienturl::ClientUrl;
use crate::connect::{Connect, client_factory};
use crate::heal::{Heal, OnRestore};
use crate::mechanisms::SelectMechanism;
use crate::mechanismtranslation::MechanismTranslation;
use crate::serialize::Serialize;
use crate::server::GrpcNetworkService;
use crate::timeout::Timeout;
use crate::trace::Trace;
use crate::updatepath::UpdatePath;

use weft_api::networkservice::v1::network_service_server::NetworkServiceServer;

pub struct EndpointBuilder {
    name: String,
    token_provider: Arc<dyn TokenProvider>,
    policy: Arc<dyn Policy>,
    additional: Vec<Arc<dyn NetworkServiceStage>>,
    supported: Option<Vec<String>>,
}

impl EndpointBuilder {
    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_additional(mut self, stage: Arc<dyn NetworkServiceStage>) -> Self {
        self.additional.push(stage);
        self
    }

    pub fn with_supported_mechanisms(mut self, supported: Vec<String>) -> Self {
        self.supported = Some(supported);
        self
    }

    pub fn build(self) -> Endpoint {
        let select = match self.supported {
            Some(supported) => SelectMechanism::with_supported(supported),
            None => SelectMechanism::new(),
        };

        let mut stages: Vec<Arc<dyn NetworkServiceStage>> = vec![
            Arc::new(Trace::new()),
            Arc::new(UpdatePath::new(&self.name, self.token_provider)),
            Arc::new(Serialize::new()),
            Arc::new(Authorize::new(self.policy)),
            Arc::new(Timeout::new()),
        ];
        stages.extend(self.additional);
        stages.push(Arc::new(select));

        Endpoint {
            name: self.name,
            chain: Arc::new(Chain::new(stages)),
        }
    }
}

/// A serving network service endpoint.
pub struct Endpoint {
    name: String,
    chain: Arc<Chain>,
}

impl Endpoint {
    pub fn builder(name: &str, token_provider: Arc<dyn TokenProvider>) -> EndpointBuilder {
        EndpointBuilder {
            name: name.to_string(),
            token_provider,
            policy: authorize::any(),
            additional: Vec::new(),
            supported: None,
        }
    }

    /// The forwarder profile: an endpoint that stitches mechanisms by
    /// looping the request back through the local NSMgr. Its inner client
    /// reuses the forwarder's own name, so the loop-back hop does not grow
    /// the path, and probe failures are dropped quietly — the real client
    /// owns recovery.
    pub fn forwarder(
        name: &str,
        token_provider: Arc<dyn TokenProvider>,
        nsmgr_url: &str,
        pool: Arc<ChannelPool>,
    ) -> Endpoint {
        let late = LateBound::new();

        let endpoint = Self::builder(name, token_provider.clone())
            .with_additional(Arc::new(ClientUrl::new(nsmgr_url)))
            .with_additional(Arc::new(Heal::new(late.clone(), OnRestore::Ignore)))
            .with_additional(Arc::new(Connect::with_factory(
                pool,
                client_factory(
                    name,
                    token_provider,
                    vec![Arc::new(MechanismTranslation::new())],
                ),
            )))
            .build();

        late.bind(endpoint.chain.clone() as Arc<dyn NetworkServiceStage>);
        endpoint
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> Arc<Chain> {
        self.chain.clone()
    }

    pub fn into_service(self) -> NetworkServiceServer<GrpcNetworkService> {
        GrpcNetworkService::new(self.chain).into_service()
    }
}
