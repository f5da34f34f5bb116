// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Outgoing gRPC leg of a chain.
//!
//! The connect stage resolves the target URL from the per-call context,
//! multiplexes the request over the pooled channel for that URL, and tracks
//! the connection id against the pool entry so the channel survives exactly
//! as long as connections use it (plus the idle grace). Transient dial
//! errors surface to the caller; the stage never retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tonic::transport::Channel;
use tonic::{Status, async_trait};
use tracing::debug;

use weft_api::networkservice::v1::network_service_client::NetworkServiceClient;
use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};
use weft_auth::TokenProvider;
use weft_config::grpc::pool::ChannelPool;

use crate::chain::{Chain, NetworkServiceStage, Next};
use crate::context::CallContext;
use crate::updatepath::UpdatePath;

const ABORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Builds the per-URL client that runs over a pooled channel. The default
/// factory is the bare remote call; chains that need their own stamping or
/// translation on the outgoing leg supply a richer one via
/// [`client_factory`].
pub type ClientFactory = Arc<dyn Fn(Channel) -> Arc<dyn NetworkServiceStage> + Send + Sync>;

/// Terminal stage performing the remote Request/Close over a channel.
///
/// A canceled or timed-out request must not leak a half-open remote
/// connection: the stage fires a best-effort remote Close on abort.
pub struct GrpcClient {
    channel: Channel,
}

impl GrpcClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    fn abort_close(&self, conn: Option<Connection>) {
        let Some(conn) = conn else {
            return;
        };
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let mut client = NetworkServiceClient::new(channel);
            let _ = tokio::time::timeout(ABORT_CLOSE_TIMEOUT, client.close(conn)).await;
        });
    }
}

#[async_trait]
impl NetworkServiceStage for GrpcClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        _next: Next,
    ) -> Result<Connection, Status> {
        let snapshot = request.connection.clone();
        let mut client = NetworkServiceClient::new(self.channel.clone());

        let deadline = ctx.deadline;
        let wait_deadline = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            res = client.request(request) => Ok(res?.into_inner()),
            _ = ctx.cancel.cancelled() => {
                self.abort_close(snapshot);
                Err(Status::cancelled("request cancelled"))
            }
            _ = wait_deadline => {
                self.abort_close(snapshot);
                Err(Status::deadline_exceeded("request deadline exceeded"))
            }
        }
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        _next: Next,
    ) -> Result<(), Status> {
        let mut client = NetworkServiceClient::new(self.channel.clone());
        tokio::select! {
            res = client.close(conn) => res.map(|_| ()),
            _ = ctx.cancel.cancelled() => Err(Status::cancelled("close cancelled")),
        }
    }
}

/// The connect stage: per-URL pooled channels wrapped by per-URL clients.
pub struct Connect {
    pool: Arc<ChannelPool>,
    factory: ClientFactory,
    clients: Mutex<HashMap<String, Arc<dyn NetworkServiceStage>>>,
    // last target URL per connection id, the state Close must release even
    // when the upstream stages can no longer resolve a target
    ids: Mutex<HashMap<String, String>>,
}

impl Connect {
    /// Connect stage whose outgoing leg is the bare remote call.
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self::with_factory(
            pool,
            Arc::new(|channel| Arc::new(GrpcClient::new(channel)) as Arc<dyn NetworkServiceStage>),
        )
    }

    pub fn with_factory(pool: Arc<ChannelPool>, factory: ClientFactory) -> Self {
        Self {
            pool,
            factory,
            clients: Mutex::new(HashMap::new()),
            ids: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, url: &str) -> Result<Arc<dyn NetworkServiceStage>, Status> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(url) {
            return Ok(client.clone());
        }

        let channel = self
            .pool
            .checkout(url)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let client = (self.factory)(channel);
        clients.insert(url.to_string(), client.clone());

        Ok(client)
    }

    fn target_url(&self, ctx: &CallContext, conn_id: Option<&str>) -> Result<String, Status> {
        if let Some(url) = ctx.client_url.clone() {
            return Ok(url);
        }
        // Close may arrive without a resolvable target upstream; fall back
        // to where the connection was requested
        if let Some(url) = conn_id.and_then(|id| self.ids.lock().get(id).cloned()) {
            return Ok(url);
        }
        Err(Status::invalid_argument("no target URL in context"))
    }
}

#[async_trait]
impl NetworkServiceStage for Connect {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        _next: Next,
    ) -> Result<Connection, Status> {
        let url = self.target_url(ctx, None)?;
        let client = self.client_for(&url)?;

        let conn = client.request(ctx, request, Next::empty()).await?;

        if self
            .pool
            .track(&url, &conn.id)
            .map_err(|e| Status::internal(e.to_string()))?
        {
            debug!(conn_id = %conn.id, %url, "connection multiplexed onto channel");
        }
        self.ids.lock().insert(conn.id.clone(), url);

        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        _next: Next,
    ) -> Result<(), Status> {
        let id = conn.id.clone();
        let url = self.target_url(ctx, Some(&id))?;
        let client = self.client_for(&url)?;

        // release local state even when the remote close fails
        let res = client.close(ctx, conn, Next::empty()).await;
        self.pool.untrack(&url, &id);
        self.ids.lock().remove(&id);
        if let Some(client) = {
            let mut clients = self.clients.lock();
            if self.pool.in_use(&url) == 0 {
                clients.remove(&url)
            } else {
                None
            }
        } {
            drop(client);
            debug!(%url, "released per-URL client");
        }

        res
    }
}

/// Factory for outgoing client chains: path stamping under the given name,
/// the supplied additional stages, then the remote call. An element reusing
/// its own name here keeps the path length unchanged across the loop-back
/// hop.
pub fn client_factory(
    name: &str,
    token_provider: Arc<dyn TokenProvider>,
    additional: Vec<Arc<dyn NetworkServiceStage>>,
) -> ClientFactory {
    let name = name.to_string();
    Arc::new(move |channel| {
        let mut stages: Vec<Arc<dyn NetworkServiceStage>> = vec![Arc::new(UpdatePath::new(
            &name,
            token_provider.clone(),
        ))];
        stages.extend(additional.iter().cloned());
        stages.push(Arc::new(GrpcClient::new(channel)));
        Arc::new(Chain::new(stages)) as Arc<dyn NetworkServiceStage>
    })
}
