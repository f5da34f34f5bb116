// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-memory NS/NSE stores with find-with-watch and lease expiration.
//!
//! Each store is one map behind one lock. Watcher fan-out never happens with
//! the lock held: matching senders are collected under the lock, the events
//! are delivered outside it, and a watcher that stays blocked past the send
//! timeout is dropped so its consumer sees end-of-stream.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Status, async_trait};
use tracing::debug;

use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery,
    NetworkServiceEndpointResponse, NetworkServiceQuery, NetworkServiceResponse,
};

use crate::chain::{
    NsNext, NsRegistryStage, NsResponseStream, NseNext, NseRegistryStage, NseResponseStream,
};
use crate::clock::{Clock, SystemClock, from_timestamp, to_timestamp};
use crate::context::RegistryContext;
use crate::matches::{endpoint_matches, service_matches};

const DEFAULT_WATCH_CAPACITY: usize = 64;
const WATCH_SEND_TIMEOUT: Duration = Duration::from_millis(100);

struct NseWatcher {
    id: u64,
    template: NetworkServiceEndpoint,
    tx: mpsc::Sender<NetworkServiceEndpointResponse>,
}

#[derive(Default)]
struct NseState {
    records: HashMap<String, NetworkServiceEndpoint>,
    watchers: Vec<NseWatcher>,
    next_watcher: u64,
}

struct NseShared {
    state: Mutex<NseState>,
    clock: Arc<dyn Clock>,
    lease: Option<Duration>,
    watch_capacity: usize,
}

impl NseShared {
    fn is_expired(&self, endpoint: &NetworkServiceEndpoint) -> bool {
        endpoint
            .expiration_time
            .as_ref()
            .and_then(from_timestamp)
            .is_some_and(|t| t <= self.clock.now())
    }

    /// Delivers one event to every watcher whose template matches the full
    /// record. Watchers that block past the timeout or whose consumer is
    /// gone are removed.
    async fn broadcast(
        &self,
        record: &NetworkServiceEndpoint,
        response: NetworkServiceEndpointResponse,
    ) {
        let targets: Vec<(u64, mpsc::Sender<NetworkServiceEndpointResponse>)> = {
            let state = self.state.lock();
            state
                .watchers
                .iter()
                .filter(|w| endpoint_matches(&w.template, record))
                .map(|w| (w.id, w.tx.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx
                .send_timeout(response.clone(), WATCH_SEND_TIMEOUT)
                .await
                .is_err()
            {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            debug!(dropped = dead.len(), "dropping blocked endpoint watchers");
            self.state
                .lock()
                .watchers
                .retain(|w| !dead.contains(&w.id));
        }
    }
}

/// In-memory network service endpoint registry.
pub struct NseMemory {
    shared: Arc<NseShared>,
    token: CancellationToken,
}

impl NseMemory {
    pub fn new() -> Self {
        Self::build(None, Arc::new(SystemClock), DEFAULT_WATCH_CAPACITY)
    }

    /// Store that assigns `now + lease` on Register and sweeps expired
    /// records in the background, emitting delete events.
    pub fn with_lease(lease: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::build(Some(lease), clock, DEFAULT_WATCH_CAPACITY)
    }

    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        // Rebuild shared state with the new capacity; only sensible before
        // the store is wired into a chain.
        let lease = self.shared.lease;
        let clock = self.shared.clock.clone();
        self.token.cancel();
        self = Self::build(lease, clock, capacity);
        self
    }

    fn build(lease: Option<Duration>, clock: Arc<dyn Clock>, watch_capacity: usize) -> Self {
        let shared = Arc::new(NseShared {
            state: Mutex::new(NseState::default()),
            clock,
            lease,
            watch_capacity,
        });
        let token = CancellationToken::new();

        if let Some(lease) = lease {
            let period = (lease / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
            Self::spawn_sweeper(Arc::downgrade(&shared), token.clone(), period);
        }

        Self { shared, token }
    }

    fn spawn_sweeper(shared: Weak<NseShared>, token: CancellationToken, period: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else {
                            break;
                        };

                        let expired: Vec<NetworkServiceEndpoint> = {
                            let mut state = shared.state.lock();
                            let names: Vec<String> = state
                                .records
                                .values()
                                .filter(|r| shared.is_expired(r))
                                .map(|r| r.name.clone())
                                .collect();
                            names
                                .iter()
                                .filter_map(|n| state.records.remove(n))
                                .collect()
                        };

                        for record in expired {
                            debug!(name = %record.name, "endpoint lease expired");
                            let stub = NetworkServiceEndpoint {
                                name: record.name.clone(),
                                ..Default::default()
                            };
                            shared
                                .broadcast(
                                    &record,
                                    NetworkServiceEndpointResponse {
                                        network_service_endpoint: Some(stub),
                                        deleted: true,
                                    },
                                )
                                .await;
                        }
                    }
                    _ = token.cancelled() => {
                        break;
                    }
                }
            }
        });
    }
}

impl Default for NseMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NseMemory {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[async_trait]
impl NseRegistryStage for NseMemory {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        mut endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status> {
        if endpoint.name.is_empty() {
            return Err(Status::invalid_argument("endpoint name is required"));
        }

        if let Some(lease) = self.shared.lease {
            endpoint.expiration_time = Some(to_timestamp(self.shared.clock.now() + lease));
        }

        next.register(ctx, endpoint.clone()).await?;

        self.shared
            .state
            .lock()
            .records
            .insert(endpoint.name.clone(), endpoint.clone());

        self.shared
            .broadcast(
                &endpoint,
                NetworkServiceEndpointResponse {
                    network_service_endpoint: Some(endpoint.clone()),
                    deleted: false,
                },
            )
            .await;

        Ok(endpoint)
    }

    async fn find(
        &self,
        _ctx: &mut RegistryContext,
        query: NetworkServiceEndpointQuery,
        _next: NseNext,
    ) -> Result<NseResponseStream, Status> {
        let template = query.network_service_endpoint.unwrap_or_default();

        // watcher registration happens under the same lock as the snapshot,
        // so snapshot events always precede live events
        let (snapshot, rx) = {
            let mut state = self.shared.state.lock();

            let snapshot: Vec<NetworkServiceEndpointResponse> = state
                .records
                .values()
                .filter(|r| endpoint_matches(&template, r) && !self.shared.is_expired(r))
                .map(|r| NetworkServiceEndpointResponse {
                    network_service_endpoint: Some(r.clone()),
                    deleted: false,
                })
                .collect();

            let rx = if query.watch {
                let (tx, rx) = mpsc::channel(self.shared.watch_capacity);
                let id = state.next_watcher;
                state.next_watcher += 1;
                state.watchers.push(NseWatcher {
                    id,
                    template: template.clone(),
                    tx,
                });
                Some(rx)
            } else {
                None
            };

            (snapshot, rx)
        };

        let snapshot = futures::stream::iter(snapshot.into_iter().map(Ok::<_, Status>));
        match rx {
            Some(rx) => Ok(Box::pin(
                snapshot.chain(ReceiverStream::new(rx).map(Ok::<_, Status>)),
            )),
            None => Ok(Box::pin(snapshot)),
        }
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<(), Status> {
        let removed = self.shared.state.lock().records.remove(&endpoint.name);

        if let Some(record) = removed {
            let stub = NetworkServiceEndpoint {
                name: record.name.clone(),
                ..Default::default()
            };
            self.shared
                .broadcast(
                    &record,
                    NetworkServiceEndpointResponse {
                        network_service_endpoint: Some(stub),
                        deleted: true,
                    },
                )
                .await;
        }

        next.unregister(ctx, endpoint).await
    }
}

struct NsWatcher {
    id: u64,
    template: NetworkService,
    tx: mpsc::Sender<NetworkServiceResponse>,
}

#[derive(Default)]
struct NsState {
    records: HashMap<String, NetworkService>,
    watchers: Vec<NsWatcher>,
    next_watcher: u64,
}

/// In-memory network service registry. Services carry no lease.
pub struct NsMemory {
    state: Mutex<NsState>,
    watch_capacity: usize,
}

impl NsMemory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NsState::default()),
            watch_capacity: DEFAULT_WATCH_CAPACITY,
        }
    }

    async fn broadcast(&self, record: &NetworkService, response: NetworkServiceResponse) {
        let targets: Vec<(u64, mpsc::Sender<NetworkServiceResponse>)> = {
            let state = self.state.lock();
            state
                .watchers
                .iter()
                .filter(|w| service_matches(&w.template, record))
                .map(|w| (w.id, w.tx.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx
                .send_timeout(response.clone(), WATCH_SEND_TIMEOUT)
                .await
                .is_err()
            {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            debug!(dropped = dead.len(), "dropping blocked service watchers");
            self.state.lock().watchers.retain(|w| !dead.contains(&w.id));
        }
    }
}

impl Default for NsMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NsRegistryStage for NsMemory {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<NetworkService, Status> {
        if service.name.is_empty() {
            return Err(Status::invalid_argument("service name is required"));
        }

        next.register(ctx, service.clone()).await?;

        self.state
            .lock()
            .records
            .insert(service.name.clone(), service.clone());

        self.broadcast(
            &service,
            NetworkServiceResponse {
                network_service: Some(service.clone()),
                deleted: false,
            },
        )
        .await;

        Ok(service)
    }

    async fn find(
        &self,
        _ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
        _next: NsNext,
    ) -> Result<NsResponseStream, Status> {
        let template = query.network_service.unwrap_or_default();

        let (snapshot, rx) = {
            let mut state = self.state.lock();

            let snapshot: Vec<NetworkServiceResponse> = state
                .records
                .values()
                .filter(|r| service_matches(&template, r))
                .map(|r| NetworkServiceResponse {
                    network_service: Some(r.clone()),
                    deleted: false,
                })
                .collect();

            let rx = if query.watch {
                let (tx, rx) = mpsc::channel(self.watch_capacity);
                let id = state.next_watcher;
                state.next_watcher += 1;
                state.watchers.push(NsWatcher {
                    id,
                    template: template.clone(),
                    tx,
                });
                Some(rx)
            } else {
                None
            };

            (snapshot, rx)
        };

        let snapshot = futures::stream::iter(snapshot.into_iter().map(Ok::<_, Status>));
        match rx {
            Some(rx) => Ok(Box::pin(
                snapshot.chain(ReceiverStream::new(rx).map(Ok::<_, Status>)),
            )),
            None => Ok(Box::pin(snapshot)),
        }
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<(), Status> {
        let removed = self.state.lock().records.remove(&service.name);

        if let Some(record) = removed {
            let stub = NetworkService {
                name: record.name.clone(),
                ..Default::default()
            };
            self.broadcast(
                &record,
                NetworkServiceResponse {
                    network_service: Some(stub),
                    deleted: true,
                },
            )
            .await;
        }

        next.unregister(ctx, service).await
    }
}
