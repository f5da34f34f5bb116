// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Remote-registry scenarios: one connect stage multiplexing calls to
//! several registries picked per call, watches streaming across the wire,
//! and idle channel disposal once the servers are gone.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tonic::service::RoutesBuilder;

use weft_api::registry::v1::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use weft_config::grpc::client::ClientConfig;
use weft_config::grpc::pool::ChannelPool;
use weft_config::grpc::server::{ServerConfig, ServerHandle};
use weft_registry::chain::{NseRegistryChain, NseRegistryStage};
use weft_registry::connect::Connect;
use weft_registry::context::RegistryContext;
use weft_registry::memory::NseMemory;
use weft_registry::server::GrpcNseRegistry;

async fn start_nse_registry() -> (String, ServerHandle, drain::Signal) {
    let chain = NseRegistryChain::new(vec![
        Arc::new(NseMemory::new()) as Arc<dyn NseRegistryStage>,
    ]);

    let mut routes = RoutesBuilder::default();
    routes.add_service(GrpcNseRegistry::new(chain).into_service());

    let (signal, watch) = drain::channel();
    let handle = ServerConfig::with_endpoint("tcp://127.0.0.1:0")
        .run_server(routes.routes(), watch)
        .await
        .expect("registry should bind");
    let url = handle.local_url().expect("tcp server has a url");

    (url, handle, signal)
}

fn nse(name: &str) -> NetworkServiceEndpoint {
    NetworkServiceEndpoint {
        name: name.to_string(),
        network_service_names: vec!["svc".to_string()],
        ..Default::default()
    }
}

fn query(name: &str, watch: bool) -> NetworkServiceEndpointQuery {
    NetworkServiceEndpointQuery {
        network_service_endpoint: Some(NetworkServiceEndpoint {
            name: name.to_string(),
            ..Default::default()
        }),
        watch,
    }
}

fn ctx_for(url: &str) -> RegistryContext {
    let mut ctx = RegistryContext::new();
    ctx.client_url = Some(url.to_string());
    ctx
}

#[tokio::test]
async fn test_connect_multiplexes_registries_per_call() {
    let (url1, handle1, _signal1) = start_nse_registry().await;
    let (url2, handle2, _signal2) = start_nse_registry().await;

    let pool = ChannelPool::with_idle_timeout(
        ClientConfig::default().with_connect_timeout(Duration::from_secs(1)),
        Duration::from_millis(100),
    );
    let chain = NseRegistryChain::new(vec![
        Arc::new(Connect::new(pool.clone())) as Arc<dyn NseRegistryStage>,
    ]);

    chain
        .register(&mut ctx_for(&url1), nse("ns-1"))
        .await
        .expect("register against first registry");
    chain
        .register(&mut ctx_for(&url2), nse("ns-1-1"))
        .await
        .expect("register against second registry");

    // the same prefix query resolves differently per target
    let mut stream = chain
        .find(&mut ctx_for(&url1), query("ns-1", false))
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(
        first.network_service_endpoint.unwrap().name,
        "ns-1"
    );
    assert!(stream.next().await.is_none());

    let mut stream = chain
        .find(&mut ctx_for(&url2), query("ns-1", false))
        .await
        .unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(
        second.network_service_endpoint.unwrap().name,
        "ns-1-1"
    );

    assert_eq!(pool.len(), 2);

    // both servers go away; the idle grace disposes the channels
    handle1.cancel();
    handle2.cancel();
    drop(stream);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.len(), 0);
}

#[tokio::test]
async fn test_watch_streams_across_the_wire() {
    let (url, _handle, _signal) = start_nse_registry().await;

    let pool = ChannelPool::new(
        ClientConfig::default().with_connect_timeout(Duration::from_secs(1)),
    );
    let chain = NseRegistryChain::new(vec![
        Arc::new(Connect::new(pool.clone())) as Arc<dyn NseRegistryStage>,
    ]);

    chain
        .register(&mut ctx_for(&url), nse("nse-1"))
        .await
        .unwrap();

    let mut stream = chain
        .find(&mut ctx_for(&url), query("", true))
        .await
        .unwrap();

    // snapshot
    let snapshot = stream.next().await.unwrap().unwrap();
    assert_eq!(
        snapshot.network_service_endpoint.unwrap().name,
        "nse-1"
    );

    // live event after a later registration
    chain
        .register(&mut ctx_for(&url), nse("nse-2"))
        .await
        .unwrap();
    let live = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("watch event should arrive")
        .unwrap()
        .unwrap();
    assert_eq!(live.network_service_endpoint.unwrap().name, "nse-2");

    // deletion is a stub with the marker
    chain
        .unregister(&mut ctx_for(&url), nse("nse-1"))
        .await
        .unwrap();
    let deleted = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("delete event should arrive")
        .unwrap()
        .unwrap();
    assert!(deleted.deleted);
    assert_eq!(
        deleted.network_service_endpoint.unwrap().name,
        "nse-1"
    );
}
