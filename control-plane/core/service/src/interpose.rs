// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Forwarder announcements.
//!
//! Forwarders register through the NSMgr's endpoint registry under a name
//! prefixed with [`FORWARDER_PREFIX`]. The interpose stage captures those
//! registrations into a node-local store (they never reach the upstream
//! registry); discover consults the store to route requests through a
//! forwarder and to recognize requests coming back from one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tonic::{Status, async_trait};
use tracing::debug;

use weft_api::registry::v1::{
    NetworkServiceEndpoint, NetworkServiceEndpointQuery,
};
use weft_registry::chain::{NseNext, NseRegistryStage, NseResponseStream};
use weft_registry::context::RegistryContext;

pub const FORWARDER_PREFIX: &str = "forwarder#";

/// Node-local forwarder table.
#[derive(Default)]
pub struct InterposeStore {
    forwarders: Mutex<BTreeMap<String, String>>,
    round_robin: AtomicUsize,
}

impl InterposeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, name: &str, url: &str) {
        self.forwarders
            .lock()
            .insert(name.to_string(), url.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.forwarders.lock().remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.forwarders.lock().contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.forwarders.lock().is_empty()
    }

    /// Round-robin pick over the registered forwarders.
    pub fn select(&self) -> Option<(String, String)> {
        let forwarders = self.forwarders.lock();
        if forwarders.is_empty() {
            return None;
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % forwarders.len();
        forwarders
            .iter()
            .nth(index)
            .map(|(name, url)| (name.clone(), url.clone()))
    }
}

/// Registry stage capturing forwarder registrations.
pub struct Interpose {
    store: Arc<InterposeStore>,
}

impl Interpose {
    pub fn new(store: Arc<InterposeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NseRegistryStage for Interpose {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        mut endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status> {
        let Some(name) = endpoint
            .name
            .strip_prefix(FORWARDER_PREFIX)
            .map(str::to_string)
        else {
            return next.register(ctx, endpoint).await;
        };

        if endpoint.url.is_empty() {
            return Err(Status::invalid_argument("forwarder URL is required"));
        }

        debug!(forwarder = %name, url = %endpoint.url, "forwarder registered");
        self.store.insert(&name, &endpoint.url);
        endpoint.name = name;
        Ok(endpoint)
    }

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
        next: NseNext,
    ) -> Result<NseResponseStream, Status> {
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<(), Status> {
        if let Some(name) = endpoint.name.strip_prefix(FORWARDER_PREFIX) {
            debug!(forwarder = %name, "forwarder unregistered");
            self.store.remove(name);
            return Ok(());
        }
        next.unregister(ctx, endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_registry::chain::NseRegistryChain;

    #[tokio::test]
    async fn test_forwarder_registrations_are_captured_locally() {
        let store = InterposeStore::new();
        let chain = NseRegistryChain::new(vec![
            Arc::new(Interpose::new(store.clone())) as Arc<dyn NseRegistryStage>,
        ]);

        let mut ctx = RegistryContext::new();
        let out = chain
            .register(
                &mut ctx,
                NetworkServiceEndpoint {
                    name: format!("{}fwd-1", FORWARDER_PREFIX),
                    url: "tcp://127.0.0.1:9100".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(out.name, "fwd-1");
        assert!(store.contains("fwd-1"));
        assert_eq!(
            store.select(),
            Some(("fwd-1".to_string(), "tcp://127.0.0.1:9100".to_string()))
        );

        chain
            .unregister(
                &mut ctx,
                NetworkServiceEndpoint {
                    name: format!("{}fwd-1", FORWARDER_PREFIX),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!store.contains("fwd-1"));
    }

    #[tokio::test]
    async fn test_round_robin_selection() {
        let store = InterposeStore::new();
        store.insert("fwd-a", "tcp://a");
        store.insert("fwd-b", "tcp://b");

        let first = store.select().unwrap().0;
        let second = store.select().unwrap().0;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_plain_registrations_pass_through() {
        let store = InterposeStore::new();
        let chain = NseRegistryChain::new(vec![
            Arc::new(Interpose::new(store.clone())) as Arc<dyn NseRegistryStage>,
        ]);

        let mut ctx = RegistryContext::new();
        let out = chain
            .register(
                &mut ctx,
                NetworkServiceEndpoint {
                    name: "plain-endpoint".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(out.name, "plain-endpoint");
        assert!(store.is_empty());
    }
}
