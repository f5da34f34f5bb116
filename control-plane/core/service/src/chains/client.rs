// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The client chain: the entry point a workload uses to request a
//! connection from its NSMgr.
//!
//! trace → updatepath → refresh → clienturl → heal → authorize →
//! [additional] → connect. Heal and refresh re-enter this chain through a
//! late-bound back reference resolved after assembly.

use std::sync::Arc;
use std::time::Duration;

use tonic::Status;

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};
use weft_auth::TokenProvider;
use weft_config::grpc::pool::ChannelPool;

use crate::authorize::{self, Authorize, Policy};
use crate::chain::{Chain, LateBound, NetworkServiceStage};
use crate::clienturl::ClientUrl;
use crate::connect::Connect;
use crate::context::CallContext;
use crate::heal::{Heal, OnRestore};
use crate::refresh::Refresh;
use crate::trace::Trace;
use crate::updatepath::UpdatePath;

pub struct ClientBuilder {
    name: String,
    connect_to: String,
    token_provider: Arc<dyn TokenProvider>,
    pool: Arc<ChannelPool>,
    policy: Arc<dyn Policy>,
    additional: Vec<Arc<dyn NetworkServiceStage>>,
    on_restore: OnRestore,
    probe_interval: Duration,
    backoff: (Duration, Duration),
    max_retries: u32,
}

impl ClientBuilder {
    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_additional(mut self, stage: Arc<dyn NetworkServiceStage>) -> Self {
        self.additional.push(stage);
        self
    }

    pub fn with_on_restore(mut self, on_restore: OnRestore) -> Self {
        self.on_restore = on_restore;
        self
    }

    pub fn with_probe_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = (base, max);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn build(self) -> Client {
        let late = LateBound::new();

        let heal = Heal::new(late.clone(), self.on_restore)
            .with_probe_interval(self.probe_interval)
            .with_backoff(self.backoff.0, self.backoff.1)
            .with_max_retries(self.max_retries);

        let mut stages: Vec<Arc<dyn NetworkServiceStage>> = vec![
            Arc::new(Trace::new()),
            Arc::new(UpdatePath::new(&self.name, self.token_provider)),
            Arc::new(Refresh::new(late.clone())),
            Arc::new(ClientUrl::new(&self.connect_to)),
            Arc::new(heal),
            Arc::new(Authorize::new(self.policy)),
        ];
        stages.extend(self.additional);
        stages.push(Arc::new(Connect::new(self.pool)));

        let chain = Arc::new(Chain::new(stages));
        late.bind(chain.clone() as Arc<dyn NetworkServiceStage>);

        Client { chain }
    }
}

/// A workload-side connection client.
pub struct Client {
    chain: Arc<Chain>,
}

impl Client {
    pub fn builder(
        name: &str,
        connect_to: &str,
        token_provider: Arc<dyn TokenProvider>,
        pool: Arc<ChannelPool>,
    ) -> ClientBuilder {
        ClientBuilder {
            name: name.to_string(),
            connect_to: connect_to.to_string(),
            token_provider,
            pool,
            policy: authorize::any(),
            additional: Vec::new(),
            on_restore: OnRestore::Restore,
            probe_interval: Duration::from_secs(1),
            backoff: (Duration::from_millis(100), Duration::from_secs(5)),
            max_retries: 5,
        }
    }

    pub async fn request(&self, request: NetworkServiceRequest) -> Result<Connection, Status> {
        let mut ctx = CallContext::new();
        self.chain.request(&mut ctx, request).await
    }

    pub async fn close(&self, conn: Connection) -> Result<(), Status> {
        let mut ctx = CallContext::new();
        self.chain.close(&mut ctx, conn).await
    }

    pub fn chain(&self) -> Arc<Chain> {
        self.chain.clone()
    }
}
