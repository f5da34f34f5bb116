// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The cluster-local manager: accepts client Requests, discovers endpoints
//! through its registry, and dispatches through forwarders (and the
//! NSMgr-Proxy for interdomain services). Also serves the registry surface
//! for the node: forwarder announcements are captured locally, everything
//! else forwards to the configured cluster registry or a local in-memory
//! store.

use std::sync::Arc;

use tonic::service::{Routes, RoutesBuilder};

use weft_auth::TokenProvider;
use weft_config::grpc::client::ClientConfig;
use weft_config::grpc::pool::ChannelPool;
use weft_registry::chain::{
    NsRegistryChain, NsRegistryStage, NseRegistryChain, NseRegistryStage,
};
use weft_registry::clienturl::ClientUrl as RegistryClientUrl;
use weft_registry::connect::Connect as RegistryConnect;
use weft_registry::memory::{NsMemory, NseMemory};
use weft_registry::server::{GrpcNsRegistry, GrpcNseRegistry};

use crate::authorize::{self, Authorize, Policy};
use crate::chain::{Chain, NetworkServiceStage};
use crate::connect::Connect;
use crate::discover::Discover;
use crate::interpose::{Interpose, InterposeStore};
use crate::serialize::Serialize;
use crate::server::GrpcNetworkService;
use crate::trace::Trace;
use crate::updatepath::UpdatePath;

pub struct NsmgrBuilder {
    name: String,
    token_provider: Arc<dyn TokenProvider>,
    registry_url: Option<String>,
    proxy_url: Option<String>,
    dial: ClientConfig,
    policy: Arc<dyn Policy>,
}

impl NsmgrBuilder {
    /// Cluster registry the manager forwards registrations and finds to.
    /// Without one the manager keeps a node-local in-memory registry.
    pub fn with_registry_url(mut self, url: &str) -> Self {
        self.registry_url = Some(url.to_string());
        self
    }

    /// Edge proxy for interdomain services.
    pub fn with_proxy_url(mut self, url: &str) -> Self {
        self.proxy_url = Some(url.to_string());
        self
    }

    /// Template for every outgoing channel (timeouts, keepalive).
    pub fn with_dial_config(mut self, dial: ClientConfig) -> Self {
        self.dial = dial;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Nsmgr {
        let pool = ChannelPool::new(self.dial);
        let interpose = InterposeStore::new();

        let (nse_registry, ns_registry) = match &self.registry_url {
            Some(url) => (
                NseRegistryChain::new(vec![
                    Arc::new(Interpose::new(interpose.clone())) as Arc<dyn NseRegistryStage>,
                    Arc::new(RegistryClientUrl::new(url)),
                    Arc::new(RegistryConnect::new(pool.clone())),
                ]),
                NsRegistryChain::new(vec![
                    Arc::new(RegistryClientUrl::new(url)) as Arc<dyn NsRegistryStage>,
                    Arc::new(RegistryConnect::new(pool.clone())),
                ]),
            ),
            None => (
                NseRegistryChain::new(vec![
                    Arc::new(Interpose::new(interpose.clone())) as Arc<dyn NseRegistryStage>,
                    Arc::new(NseMemory::new()),
                ]),
                NsRegistryChain::new(vec![
                    Arc::new(NsMemory::new()) as Arc<dyn NsRegistryStage>,
                ]),
            ),
        };

        let discover = Discover::new(
            ns_registry.clone(),
            nse_registry.clone(),
            interpose.clone(),
            self.proxy_url.clone(),
        );

        let stages: Vec<Arc<dyn NetworkServiceStage>> = vec![
            Arc::new(Trace::new()),
            Arc::new(UpdatePath::new(&self.name, self.token_provider)),
            Arc::new(Serialize::new()),
            Arc::new(Authorize::new(self.policy)),
            Arc::new(discover),
            Arc::new(Connect::new(pool.clone())),
        ];

        Nsmgr {
            name: self.name,
            service_chain: Arc::new(Chain::new(stages)),
            ns_registry,
            nse_registry,
            interpose,
            pool,
        }
    }
}

/// A built manager: the connection chain plus its registry surfaces.
pub struct Nsmgr {
    name: String,
    service_chain: Arc<Chain>,
    ns_registry: NsRegistryChain,
    nse_registry: NseRegistryChain,
    interpose: Arc<InterposeStore>,
    pool: Arc<ChannelPool>,
}

impl Nsmgr {
    pub fn builder(name: &str, token_provider: Arc<dyn TokenProvider>) -> NsmgrBuilder {
        NsmgrBuilder {
            name: name.to_string(),
            token_provider,
            registry_url: None,
            proxy_url: None,
            dial: ClientConfig::default(),
            policy: authorize::any(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> Arc<Chain> {
        self.service_chain.clone()
    }

    pub fn interpose(&self) -> Arc<InterposeStore> {
        self.interpose.clone()
    }

    pub fn pool(&self) -> Arc<ChannelPool> {
        self.pool.clone()
    }

    /// All three gRPC services of the manager, ready to serve.
    pub fn routes(&self) -> Routes {
        let mut builder = RoutesBuilder::default();
        builder.add_service(GrpcNetworkService::new(self.service_chain.clone()).into_service());
        builder.add_service(GrpcNsRegistry::new(self.ns_registry.clone()).into_service());
        builder.add_service(GrpcNseRegistry::new(self.nse_registry.clone()).into_service());
        builder.routes()
    }
}
