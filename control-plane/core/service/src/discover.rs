// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! NSMgr-side endpoint selection and routing.
//!
//! A request entering the manager is routed in two passes. On the first
//! visit (not arriving from a registered forwarder) the stage picks an
//! endpoint for the service — NS `matches` label routing, round-robin
//! tie-break — records it on the connection, and sends the request to a
//! forwarder. When the forwarder loops the request back, the sender's path
//! segment names a registered forwarder and the stage routes to the chosen
//! endpoint's URL — or, for an interdomain service, to the configured
//! NSMgr-Proxy. Without any forwarder the request goes straight to the
//! target.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use tonic::{Status, async_trait};
use tracing::{debug, warn};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};
use weft_api::registry::v1::{NetworkService, NetworkServiceEndpoint};
use weft_registry::chain::{NsRegistryChain, NseRegistryChain};
use weft_registry::context::RegistryContext;
use weft_registry::interdomain::is_interdomain;
use weft_registry::matches::labels_subset;

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;
use crate::interpose::InterposeStore;

pub struct Discover {
    ns_registry: NsRegistryChain,
    nse_registry: NseRegistryChain,
    interpose: Arc<InterposeStore>,
    proxy_url: Option<String>,
    round_robin: AtomicUsize,
}

impl Discover {
    pub fn new(
        ns_registry: NsRegistryChain,
        nse_registry: NseRegistryChain,
        interpose: Arc<InterposeStore>,
        proxy_url: Option<String>,
    ) -> Self {
        Self {
            ns_registry,
            nse_registry,
            interpose,
            proxy_url,
            round_robin: AtomicUsize::new(0),
        }
    }

    fn sender_is_forwarder(&self, conn: &Connection) -> bool {
        conn.path
            .as_ref()
            .and_then(|p| p.previous_segment())
            .is_some_and(|s| self.interpose.contains(&s.name))
    }

    fn proxy_url(&self) -> Result<String, Status> {
        self.proxy_url
            .clone()
            .ok_or_else(|| Status::not_found("no NSMgr-Proxy configured for interdomain requests"))
    }

    async fn find_services(&self, name: &str) -> Result<Vec<NetworkService>, Status> {
        let mut ctx = RegistryContext::new();
        let mut stream = self
            .ns_registry
            .find(
                &mut ctx,
                weft_api::registry::v1::NetworkServiceQuery {
                    network_service: Some(NetworkService {
                        name: name.to_string(),
                        ..Default::default()
                    }),
                    watch: false,
                },
            )
            .await?;

        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item?;
            if item.deleted {
                continue;
            }
            if let Some(service) = item.network_service {
                out.push(service);
            }
        }
        Ok(out)
    }

    async fn find_endpoints(
        &self,
        template: NetworkServiceEndpoint,
    ) -> Result<Vec<NetworkServiceEndpoint>, Status> {
        let mut ctx = RegistryContext::new();
        let mut stream = self
            .nse_registry
            .find(
                &mut ctx,
                weft_api::registry::v1::NetworkServiceEndpointQuery {
                    network_service_endpoint: Some(template),
                    watch: false,
                },
            )
            .await?;

        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            let item = item?;
            if item.deleted {
                continue;
            }
            if let Some(endpoint) = item.network_service_endpoint {
                out.push(endpoint);
            }
        }
        Ok(out)
    }

    /// Applies the NS routing predicates: the first match whose source
    /// selector covers the connection labels narrows the candidates to its
    /// destinations. Services without predicates route to everyone.
    fn route(
        service: Option<&NetworkService>,
        labels: &HashMap<String, String>,
        candidates: Vec<NetworkServiceEndpoint>,
        service_name: &str,
    ) -> Vec<NetworkServiceEndpoint> {
        let Some(service) = service else {
            return candidates;
        };

        for m in &service.matches {
            if !labels_subset(&m.source_selector, labels) {
                continue;
            }
            if m.routes.is_empty() {
                return candidates;
            }

            let routed: Vec<NetworkServiceEndpoint> = candidates
                .iter()
                .filter(|nse| {
                    m.routes.iter().any(|route| {
                        nse.network_service_labels
                            .get(service_name)
                            .map(|l| &l.labels)
                            .is_some_and(|labels| {
                                labels_subset(&route.destination_selector, labels)
                            })
                    })
                })
                .cloned()
                .collect();

            if !routed.is_empty() {
                return routed;
            }
        }

        candidates
    }

    async fn select_endpoint(
        &self,
        service: &str,
        labels: &HashMap<String, String>,
    ) -> Result<NetworkServiceEndpoint, Status> {
        let services = self.find_services(service).await?;
        let candidates = self
            .find_endpoints(NetworkServiceEndpoint {
                network_service_names: vec![service.to_string()],
                ..Default::default()
            })
            .await?;

        let routed = Self::route(services.first(), labels, candidates, service);
        if routed.is_empty() {
            return Err(Status::not_found(format!(
                "no endpoints available for service {}",
                service
            )));
        }

        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) % routed.len();
        Ok(routed[index].clone())
    }

    async fn endpoint_by_name(&self, name: &str) -> Result<NetworkServiceEndpoint, Status> {
        let found = self
            .find_endpoints(NetworkServiceEndpoint {
                name: name.to_string(),
                ..Default::default()
            })
            .await?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| Status::not_found(format!("endpoint {} not found", name)))
    }

    /// Routing without selection; the endpoint name must already be chosen
    /// unless the service is interdomain.
    async fn resolve_url(&self, conn: &Connection) -> Result<String, Status> {
        let service = &conn.network_service;

        if self.sender_is_forwarder(conn) || self.interpose.is_empty() {
            if is_interdomain(service) {
                return self.proxy_url();
            }
            let endpoint = if conn.network_service_endpoint_name.is_empty() {
                self.select_endpoint(service, &conn.labels).await?
            } else {
                self.endpoint_by_name(&conn.network_service_endpoint_name)
                    .await?
            };
            return Ok(endpoint.url);
        }

        // first pass: hand the request to a forwarder
        let (name, url) = self
            .interpose
            .select()
            .ok_or_else(|| Status::not_found("no forwarder available"))?;
        debug!(forwarder = %name, "routing through forwarder");
        Ok(url)
    }
}

#[async_trait]
impl NetworkServiceStage for Discover {
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

        // pin the endpoint on the first pass so every later pass (and every
        // refresh) lands on the same one
        if !self.sender_is_forwarder(conn)
            && !is_interdomain(&conn.network_service)
            && conn.network_service_endpoint_name.is_empty()
        {
            let endpoint = self
                .select_endpoint(&conn.network_service, &conn.labels)
                .await?;
            conn.network_service_endpoint_name = endpoint.name.clone();
        }

        ctx.client_url = Some(self.resolve_url(conn).await?);
        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        match self.resolve_url(&conn).await {
            Ok(url) => {
                ctx.client_url = Some(url);
            }
            Err(e) => {
                // descend anyway: connect remembers where the connection was
                // requested and still has state to release
                warn!(conn_id = %conn.id, error = %e, "close could not be re-routed");
            }
        }
        next.close(ctx, conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_api::registry::v1::{Destination, Match, NetworkServiceLabels};

    fn nse(name: &str, labels: &[(&str, &str)]) -> NetworkServiceEndpoint {
        NetworkServiceEndpoint {
            name: name.to_string(),
            network_service_names: vec!["svc".to_string()],
            network_service_labels: HashMap::from([(
                "svc".to_string(),
                NetworkServiceLabels {
                    labels: labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
            )]),
            ..Default::default()
        }
    }

    #[test]
    fn test_route_without_predicates_keeps_all() {
        let candidates = vec![nse("a", &[]), nse("b", &[])];
        let routed = Discover::route(None, &HashMap::new(), candidates.clone(), "svc");
        assert_eq!(routed.len(), 2);
    }

    #[test]
    fn test_route_narrows_by_destination_selector() {
        let service = NetworkService {
            name: "svc".to_string(),
            matches: vec![Match {
                source_selector: HashMap::from([(
                    "app".to_string(),
                    "db".to_string(),
                )]),
                routes: vec![Destination {
                    destination_selector: HashMap::from([(
                        "zone".to_string(),
                        "a".to_string(),
                    )]),
                    weight: 1,
                }],
            }],
            ..Default::default()
        };

        let candidates = vec![nse("a", &[("zone", "a")]), nse("b", &[("zone", "b")])];
        let labels = HashMap::from([("app".to_string(), "db".to_string())]);

        let routed = Discover::route(Some(&service), &labels, candidates.clone(), "svc");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].name, "a");

        // labels that match no predicate fall back to every candidate
        let routed = Discover::route(Some(&service), &HashMap::new(), candidates, "svc");
        assert_eq!(routed.len(), 2);
    }
}
