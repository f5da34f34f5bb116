// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The cluster edge proxy.
//!
//! Requests for the local domain (or carrying no domain at all) are handed
//! to the local NSMgr with the suffix stripped. Requests for a domain with
//! its own edge proxy are forwarded there unchanged. Requests for a
//! floating domain are resolved against the floating registry: the chosen
//! endpoint's URL is the remote cluster's public proxy, spliced in when the
//! endpoint registered. The proxy stamps its own path segment before
//! descending.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tonic::service::{Routes, RoutesBuilder};
use tonic::{Status, async_trait};
use tracing::debug;

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};
use weft_api::registry::v1::NetworkServiceEndpoint;
use weft_auth::TokenProvider;
use weft_config::grpc::client::ClientConfig;
use weft_config::grpc::pool::ChannelPool;
use weft_registry::client::NseRegistryClient;
use weft_registry::interdomain::{Resolver, split};

use crate::authorize::{self, Authorize, Policy};
use crate::chain::{Chain, NetworkServiceStage, Next};
use crate::connect::Connect;
use crate::context::CallContext;
use crate::serialize::Serialize;
use crate::server::GrpcNetworkService;
use crate::trace::Trace;
use crate::updatepath::UpdatePath;

/// The routing stage of the proxy.
struct InterdomainRoute {
    resolver: Arc<dyn Resolver>,
    local_domain: String,
    local_nsmgr_url: String,
    pool: Arc<ChannelPool>,
    round_robin: AtomicUsize,
}

impl InterdomainRoute {
    /// Picks the downstream URL and normalizes the connection for it.
    async fn route(&self, conn: &mut Connection) -> Result<String, Status> {
        let service = conn.network_service.clone();
        let (base, domain) = split(&service);

        let Some(domain) = domain else {
            return Ok(self.local_nsmgr_url.clone());
        };

        if domain == self.local_domain {
            conn.network_service = base.to_string();
            return Ok(self.local_nsmgr_url.clone());
        }

        let urls = self.resolver.resolve(domain).await?;

        if let Some(proxy) = urls.nsmgr_proxy {
            // the peer proxy strips the suffix on its side
            return Ok(proxy);
        }

        // floating registry rendezvous
        let registry = urls.registry.ok_or_else(|| {
            Status::not_found(format!("domain {} has no edge to forward to", domain))
        })?;

        let client = NseRegistryClient::new(&registry, self.pool.clone());
        let template = if conn.network_service_endpoint_name.is_empty() {
            NetworkServiceEndpoint {
                network_service_names: vec![base.to_string()],
                ..Default::default()
            }
        } else {
            NetworkServiceEndpoint {
                name: conn.network_service_endpoint_name.clone(),
                ..Default::default()
            }
        };

        let mut found = client.find_all(template).await?;
        if found.is_empty() {
            return Err(Status::not_found(format!(
                "no endpoints for {} in floating registry {}",
                base, domain
            )));
        }

        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % found.len();
        let endpoint = found.swap_remove(index);
        debug!(endpoint = %endpoint.name, url = %endpoint.url, "resolved through floating registry");

        conn.network_service = base.to_string();
        conn.network_service_endpoint_name = endpoint.name;
        Ok(endpoint.url)
    }
}

#[async_trait]
impl NetworkServiceStage for InterdomainRoute {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let conn = request
            .connection
            .as_mut()
            .ok_or_else(|| Status::invalid_argument("connection is required"))?;
        if conn.network_service.is_empty() {
            return Err(Status::invalid_argument("network service is required"));
        }

        let requested_service = conn.network_service.clone();
        ctx.client_url = Some(self.route(conn).await?);

        let mut conn = next.request(ctx, request).await?;

        // the caller keeps addressing the service by its full interdomain
        // name; refreshes and closes route through here again
        conn.network_service = requested_service;
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        mut conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        match self.route(&mut conn).await {
            Ok(url) => {
                ctx.client_url = Some(url);
            }
            Err(e) => {
                // connect remembers where the request went
                debug!(conn_id = %conn.id, error = %e, "close could not be re-routed");
            }
        }
        next.close(ctx, conn).await
    }
}

pub struct NsmgrProxyBuilder {
    name: String,
    local_domain: String,
    local_nsmgr_url: String,
    resolver: Arc<dyn Resolver>,
    token_provider: Arc<dyn TokenProvider>,
    dial: ClientConfig,
    policy: Arc<dyn Policy>,
}

impl NsmgrProxyBuilder {
    pub fn with_dial_config(mut self, dial: ClientConfig) -> Self {
        self.dial = dial;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> NsmgrProxy {
        let pool = ChannelPool::new(self.dial);

        let route = InterdomainRoute {
            resolver: self.resolver,
            local_domain: self.local_domain,
            local_nsmgr_url: self.local_nsmgr_url,
            pool: pool.clone(),
            round_robin: AtomicUsize::new(0),
        };

        let stages: Vec<Arc<dyn NetworkServiceStage>> = vec![
            Arc::new(Trace::new()),
            Arc::new(UpdatePath::new(&self.name, self.token_provider)),
            Arc::new(Serialize::new()),
            Arc::new(Authorize::new(self.policy)),
            Arc::new(route),
            Arc::new(Connect::new(pool.clone())),
        ];

        NsmgrProxy {
            name: self.name,
            chain: Arc::new(Chain::new(stages)),
            pool,
        }
    }
}

/// A built edge proxy.
pub struct NsmgrProxy {
    name: String,
    chain: Arc<Chain>,
    pool: Arc<ChannelPool>,
}

impl NsmgrProxy {
    pub fn builder(
        name: &str,
        local_domain: &str,
        local_nsmgr_url: &str,
        resolver: Arc<dyn Resolver>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> NsmgrProxyBuilder {
        NsmgrProxyBuilder {
            name: name.to_string(),
            local_domain: local_domain.to_string(),
            local_nsmgr_url: local_nsmgr_url.to_string(),
            resolver,
            token_provider,
            dial: ClientConfig::default(),
            policy: authorize::any(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain(&self) -> Arc<Chain> {
        self.chain.clone()
    }

    pub fn pool(&self) -> Arc<ChannelPool> {
        self.pool.clone()
    }

    pub fn routes(&self) -> Routes {
        let mut builder = RoutesBuilder::default();
        builder.add_service(GrpcNetworkService::new(self.chain.clone()).into_service());
        builder.routes()
    }
}
