// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process cluster harness: registry, NSMgr, forwarder and edge proxy
//! wired over real gRPC servers on loopback, with a static DNS fake.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tonic::service::RoutesBuilder;

use weft_api::networkservice::v1::{Connection, Mechanism, NetworkServiceRequest};
use weft_api::registry::v1::{NetworkService, NetworkServiceEndpoint};
use weft_api::{cls, mechanisms};
use weft_auth::SharedSecretTokenProvider;
use weft_config::grpc::client::ClientConfig;
use weft_config::grpc::pool::ChannelPool;
use weft_config::grpc::server::{ServerConfig, ServerHandle};
use weft_registry::chain::{
    NsRegistryChain, NsRegistryStage, NseRegistryChain, NseRegistryStage,
};
use weft_registry::client::{NsRegistryClient, NseRegistryClient};
use weft_registry::clock::SystemClock;
use weft_registry::connect::Connect as RegistryConnect;
use weft_registry::interdomain::{DomainUrls, StaticResolver};
use weft_registry::memory::{NsMemory, NseMemory};
use weft_registry::proxy::{NsInterdomainForward, NseInterdomainForward};
use weft_registry::server::{GrpcNsRegistry, GrpcNseRegistry};
use weft_service::chain::NetworkServiceStage;
use weft_service::chains::client::Client;
use weft_service::chains::endpoint::Endpoint;
use weft_service::chains::nsmgr::Nsmgr;
use weft_service::chains::nsmgrproxy::NsmgrProxy;
use weft_service::interpose::FORWARDER_PREFIX;

pub const LEASE: Duration = Duration::from_secs(60);

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn loopback_url(port: u16) -> String {
    format!("tcp://127.0.0.1:{}", port)
}

pub fn dial_config() -> ClientConfig {
    ClientConfig::default()
        .with_connect_timeout(Duration::from_secs(1))
        .with_request_timeout(Duration::from_secs(5))
}

pub fn token_provider() -> Arc<SharedSecretTokenProvider> {
    Arc::new(SharedSecretTokenProvider::new(
        "weft-test",
        Duration::from_secs(60),
    ))
}

/// One cluster: registry + NSMgr + forwarder, optionally an edge proxy.
pub struct TestCluster {
    pub domain: String,
    pub nsmgr_url: String,
    pub registry_url: String,
    pub proxy_url: Option<String>,
    pub forwarder_name: String,
    pub token_provider: Arc<SharedSecretTokenProvider>,
    pub pool: Arc<ChannelPool>,
    pub resolver: Arc<StaticResolver>,
    signals: Vec<drain::Signal>,
    handles: Vec<ServerHandle>,
}

impl TestCluster {
    pub async fn serve(&mut self, endpoint: &str, routes: tonic::service::Routes) {
        let (signal, watch) = drain::channel();
        let handle = ServerConfig::with_endpoint(endpoint)
            .run_server(routes, watch)
            .await
            .expect("server should bind");
        self.signals.push(signal);
        self.handles.push(handle);
    }

    pub fn nse_registry_client(&self) -> NseRegistryClient {
        NseRegistryClient::new(&self.nsmgr_url, self.pool.clone())
    }

    /// Registry client that renews endpoint leases in the background.
    pub fn refreshing_nse_registry_client(&self) -> NseRegistryClient {
        NseRegistryClient::with_refresh(&self.nsmgr_url, self.pool.clone())
    }

    pub fn ns_registry_client(&self) -> NsRegistryClient {
        NsRegistryClient::new(&self.nsmgr_url, self.pool.clone())
    }

    pub fn client(&self, name: &str) -> Client {
        Client::builder(
            name,
            &self.nsmgr_url,
            self.token_provider.clone(),
            self.pool.clone(),
        )
        .build()
    }

    /// Registers an NS and serves + registers an NSE offering it. Returns
    /// the endpoint URL.
    pub async fn add_endpoint(
        &mut self,
        nse_name: &str,
        ns_name: &str,
        additional: Vec<Arc<dyn NetworkServiceStage>>,
    ) -> String {
        self.ns_registry_client()
            .register(NetworkService {
                name: ns_name.to_string(),
                ..Default::default()
            })
            .await
            .expect("service registration");

        let port = free_port();
        let url = loopback_url(port);

        let mut builder = Endpoint::builder(nse_name, self.token_provider.clone());
        for stage in additional {
            builder = builder.with_additional(stage);
        }
        let endpoint = builder.build();

        let mut routes = RoutesBuilder::default();
        routes.add_service(endpoint.into_service());
        self.serve(&url, routes.routes()).await;

        let (base_service, _) = weft_registry::interdomain::split(ns_name);
        self.refreshing_nse_registry_client()
            .register(NetworkServiceEndpoint {
                name: nse_name.to_string(),
                network_service_names: vec![base_service.to_string()],
                url: url.clone(),
                ..Default::default()
            })
            .await
            .expect("endpoint registration");

        url
    }

    /// Shuts every server of the cluster down.
    pub fn shutdown(&mut self) {
        for handle in &self.handles {
            handle.cancel();
        }
        self.handles.clear();
        self.signals.clear();
    }
}

/// Starts a full cluster. `with_edge` adds the NSMgr-Proxy and points the
/// manager's interdomain route at it.
pub async fn start_cluster(domain: &str, resolver: Arc<StaticResolver>, with_edge: bool) -> TestCluster {
    let provider = token_provider();
    let pool = ChannelPool::new(dial_config());

    let registry_url = loopback_url(free_port());
    let nsmgr_url = loopback_url(free_port());
    let proxy_url = with_edge.then(|| loopback_url(free_port()));

    resolver.insert(
        domain,
        DomainUrls {
            nsmgr_proxy: proxy_url.clone(),
            registry: Some(registry_url.clone()),
        },
    );

    let mut cluster = TestCluster {
        domain: domain.to_string(),
        nsmgr_url: nsmgr_url.clone(),
        registry_url: registry_url.clone(),
        proxy_url: proxy_url.clone(),
        forwarder_name: format!("fwd-{}", domain),
        token_provider: provider.clone(),
        pool: pool.clone(),
        resolver: resolver.clone(),
        signals: Vec::new(),
        handles: Vec::new(),
    };

    // cluster registry: local store plus interdomain forwarding towards
    // floating registries
    let public_edge = proxy_url.clone().unwrap_or_else(|| nsmgr_url.clone());
    let nse_chain = NseRegistryChain::new(vec![
        Arc::new(NseMemory::with_lease(LEASE, Arc::new(SystemClock)))
            as Arc<dyn NseRegistryStage>,
        Arc::new(NseInterdomainForward::new(
            resolver.clone(),
            domain,
            &public_edge,
        )),
        Arc::new(RegistryConnect::new(pool.clone())),
    ]);
    let ns_chain = NsRegistryChain::new(vec![
        Arc::new(NsMemory::new()) as Arc<dyn NsRegistryStage>,
        Arc::new(NsInterdomainForward::new(resolver.clone(), domain)),
        Arc::new(RegistryConnect::new(pool.clone())),
    ]);

    let mut routes = RoutesBuilder::default();
    routes.add_service(GrpcNsRegistry::new(ns_chain).into_service());
    routes.add_service(GrpcNseRegistry::new(nse_chain).into_service());
    cluster.serve(&registry_url, routes.routes()).await;

    // manager
    let mut nsmgr_builder = Nsmgr::builder(&format!("nsmgr-{}", domain), provider.clone())
        .with_registry_url(&registry_url)
        .with_dial_config(dial_config());
    if let Some(proxy_url) = &proxy_url {
        nsmgr_builder = nsmgr_builder.with_proxy_url(proxy_url);
    }
    let nsmgr = nsmgr_builder.build();
    cluster.serve(&nsmgr_url, nsmgr.routes()).await;

    // edge proxy
    if let Some(proxy_url) = &proxy_url {
        let proxy = NsmgrProxy::builder(
            &format!("nsmgr-proxy-{}", domain),
            domain,
            &nsmgr_url,
            resolver.clone(),
            provider.clone(),
        )
        .with_dial_config(dial_config())
        .build();
        cluster.serve(proxy_url, proxy.routes()).await;
    }

    // forwarder: a serving endpoint announced through the manager
    let forwarder_url = loopback_url(free_port());
    let forwarder = Endpoint::forwarder(
        &cluster.forwarder_name,
        provider.clone(),
        &nsmgr_url,
        pool.clone(),
    );
    let mut routes = RoutesBuilder::default();
    routes.add_service(forwarder.into_service());
    cluster.serve(&forwarder_url, routes.routes()).await;

    cluster
        .nse_registry_client()
        .register(NetworkServiceEndpoint {
            name: format!("{}{}", FORWARDER_PREFIX, cluster.forwarder_name),
            url: forwarder_url,
            ..Default::default()
        })
        .await
        .expect("forwarder registration");

    cluster
}

/// A registry-only domain at a stable DNS name: the rendezvous point.
pub struct FloatingRegistry {
    pub domain: String,
    pub url: String,
    signals: Vec<drain::Signal>,
    handles: Vec<ServerHandle>,
}

pub async fn start_floating_registry(domain: &str, resolver: Arc<StaticResolver>) -> FloatingRegistry {
    let url = loopback_url(free_port());

    resolver.insert(
        domain,
        DomainUrls {
            nsmgr_proxy: None,
            registry: Some(url.clone()),
        },
    );

    let nse_chain = NseRegistryChain::new(vec![Arc::new(NseMemory::with_lease(
        LEASE,
        Arc::new(SystemClock),
    )) as Arc<dyn NseRegistryStage>]);
    let ns_chain =
        NsRegistryChain::new(vec![Arc::new(NsMemory::new()) as Arc<dyn NsRegistryStage>]);

    let mut routes = RoutesBuilder::default();
    routes.add_service(GrpcNsRegistry::new(ns_chain).into_service());
    routes.add_service(GrpcNseRegistry::new(nse_chain).into_service());

    let (signal, watch) = drain::channel();
    let handle = ServerConfig::with_endpoint(&url)
        .run_server(routes.routes(), watch)
        .await
        .expect("floating registry should bind");

    FloatingRegistry {
        domain: domain.to_string(),
        url,
        signals: vec![signal],
        handles: vec![handle],
    }
}

pub fn connection_request(id: &str, network_service: &str) -> NetworkServiceRequest {
    NetworkServiceRequest {
        connection: Some(Connection {
            id: id.to_string(),
            network_service: network_service.to_string(),
            ..Default::default()
        }),
        mechanism_preferences: vec![Mechanism {
            cls: cls::LOCAL.to_string(),
            r#type: mechanisms::KERNEL.to_string(),
            ..Default::default()
        }],
    }
}

pub fn refresh_request(conn: &Connection) -> NetworkServiceRequest {
    NetworkServiceRequest {
        connection: Some(conn.clone()),
        mechanism_preferences: vec![Mechanism {
            cls: cls::LOCAL.to_string(),
            r#type: mechanisms::KERNEL.to_string(),
            ..Default::default()
        }],
    }
}

pub fn segment_count(conn: &Connection) -> usize {
    conn.path
        .as_ref()
        .map(|p| p.path_segments.len())
        .unwrap_or(0)
}

pub fn segment_names(conn: &Connection) -> Vec<String> {
    conn.path
        .as_ref()
        .map(|p| p.path_segments.iter().map(|s| s.name.clone()).collect())
        .unwrap_or_default()
}
