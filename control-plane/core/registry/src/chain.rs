// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Stage contract and continuation dispatch for registry chains.
//!
//! A chain is an ordered list of stages sharing the same three-method
//! contract. Each stage receives an owned [`NsNext`]/[`NseNext`] continuation
//! and calls it at most once per entry; an exhausted continuation behaves as
//! the identity.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tonic::{Status, async_trait};

use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery,
    NetworkServiceEndpointResponse, NetworkServiceQuery, NetworkServiceResponse,
};

use crate::context::RegistryContext;

/// Stream of find results: a snapshot of matching records, followed by live
/// events while the query watches.
pub type NsResponseStream =
    Pin<Box<dyn Stream<Item = Result<NetworkServiceResponse, Status>> + Send>>;
pub type NseResponseStream =
    Pin<Box<dyn Stream<Item = Result<NetworkServiceEndpointResponse, Status>> + Send>>;

/// One stage of a network service registry chain.
#[async_trait]
pub trait NsRegistryStage: Send + Sync + 'static {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<NetworkService, Status>;

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
        next: NsNext,
    ) -> Result<NsResponseStream, Status>;

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<(), Status>;
}

/// One stage of a network service endpoint registry chain.
#[async_trait]
pub trait NseRegistryStage: Send + Sync + 'static {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status>;

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
        next: NseNext,
    ) -> Result<NseResponseStream, Status>;

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<(), Status>;
}

/// Continuation over the remaining NS stages.
#[derive(Clone)]
pub struct NsNext {
    stages: Arc<[Arc<dyn NsRegistryStage>]>,
    index: usize,
}

impl NsNext {
    fn advance(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            index: self.index + 1,
        }
    }

    pub async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
    ) -> Result<NetworkService, Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.register(ctx, service, self.advance()).await,
            None => Ok(service),
        }
    }

    pub async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
    ) -> Result<NsResponseStream, Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.find(ctx, query, self.advance()).await,
            None => Ok(Box::pin(futures::stream::empty())),
        }
    }

    pub async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
    ) -> Result<(), Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.unregister(ctx, service, self.advance()).await,
            None => Ok(()),
        }
    }
}

/// Continuation over the remaining NSE stages.
#[derive(Clone)]
pub struct NseNext {
    stages: Arc<[Arc<dyn NseRegistryStage>]>,
    index: usize,
}

impl NseNext {
    fn advance(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            index: self.index + 1,
        }
    }

    pub async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint, Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.register(ctx, endpoint, self.advance()).await,
            None => Ok(endpoint),
        }
    }

    pub async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
    ) -> Result<NseResponseStream, Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.find(ctx, query, self.advance()).await,
            None => Ok(Box::pin(futures::stream::empty())),
        }
    }

    pub async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
    ) -> Result<(), Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.unregister(ctx, endpoint, self.advance()).await,
            None => Ok(()),
        }
    }
}

/// An assembled NS registry chain.
#[derive(Clone)]
pub struct NsRegistryChain {
    head: NsNext,
}

impl NsRegistryChain {
    pub fn new(stages: Vec<Arc<dyn NsRegistryStage>>) -> Self {
        Self {
            head: NsNext {
                stages: stages.into(),
                index: 0,
            },
        }
    }

    pub async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
    ) -> Result<NetworkService, Status> {
        self.head.register(ctx, service).await
    }

    pub async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
    ) -> Result<NsResponseStream, Status> {
        self.head.find(ctx, query).await
    }

    pub async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
    ) -> Result<(), Status> {
        self.head.unregister(ctx, service).await
    }
}

/// An assembled NSE registry chain.
#[derive(Clone)]
pub struct NseRegistryChain {
    head: NseNext,
}

impl NseRegistryChain {
    pub fn new(stages: Vec<Arc<dyn NseRegistryStage>>) -> Self {
        Self {
            head: NseNext {
                stages: stages.into(),
                index: 0,
            },
        }
    }

    pub async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint, Status> {
        self.head.register(ctx, endpoint).await
    }

    pub async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
    ) -> Result<NseResponseStream, Status> {
        self.head.find(ctx, query).await
    }

    pub async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
    ) -> Result<(), Status> {
        self.head.unregister(ctx, endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl NseRegistryStage for Recorder {
        async fn register(
            &self,
            ctx: &mut RegistryContext,
            endpoint: NetworkServiceEndpoint,
            next: NseNext,
        ) -> Result<NetworkServiceEndpoint, Status> {
            self.order.lock().push(self.name);
            next.register(ctx, endpoint).await
        }

        async fn find(
            &self,
            ctx: &mut RegistryContext,
            query: NetworkServiceEndpointQuery,
            next: NseNext,
        ) -> Result<NseResponseStream, Status> {
            self.order.lock().push(self.name);
            next.find(ctx, query).await
        }

        async fn unregister(
            &self,
            ctx: &mut RegistryContext,
            endpoint: NetworkServiceEndpoint,
            next: NseNext,
        ) -> Result<(), Status> {
            self.order.lock().push(self.name);
            next.unregister(ctx, endpoint).await
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_identity_tail() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let chain = NseRegistryChain::new(vec![
            Arc::new(Recorder {
                name: "first",
                order: order.clone(),
            }),
            Arc::new(Recorder {
                name: "second",
                order: order.clone(),
            }),
        ]);

        let mut ctx = RegistryContext::new();
        let endpoint = NetworkServiceEndpoint {
            name: "nse-1".to_string(),
            ..Default::default()
        };

        let out = chain.register(&mut ctx, endpoint.clone()).await.unwrap();
        assert_eq!(out, endpoint);
        assert_eq!(*order.lock(), vec!["first", "second"]);

        order.lock().clear();
        chain.unregister(&mut ctx, endpoint).await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_empty_chain_find_is_empty_stream() {
        use tokio_stream::StreamExt;

        let chain = NseRegistryChain::new(Vec::new());
        let mut ctx = RegistryContext::new();
        let mut stream = chain
            .find(&mut ctx, NetworkServiceEndpointQuery::default())
            .await
            .unwrap();
        assert!(stream.next().await.is_none());
    }
}
