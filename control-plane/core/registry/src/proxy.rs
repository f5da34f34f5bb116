// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Registry-side interdomain forwarding.
//!
//! Registrations whose name carries an `@domain` suffix are forwarded to the
//! resolved domain registry (typically a floating registry) in addition to
//! the local store. The forwarded endpoint's URL is rewritten to this
//! cluster's public NSMgr-Proxy URL, so a foreign cluster that discovers the
//! endpoint reaches it through our edge without direct peering.

use std::sync::Arc;

use tonic::{Status, async_trait};
use tracing::debug;

use weft_api::registry::v1::{
    NetworkService, NetworkServiceEndpoint, NetworkServiceEndpointQuery, NetworkServiceQuery,
};

use crate::chain::{
    NsNext, NsRegistryStage, NsResponseStream, NseNext, NseRegistryStage, NseResponseStream,
};
use crate::context::RegistryContext;
use crate::interdomain::{Resolver, split};

/// Forwards interdomain NSE registrations towards the suffix domain.
pub struct NseInterdomainForward {
    resolver: Arc<dyn Resolver>,
    local_domain: String,
    public_proxy_url: String,
}

impl NseInterdomainForward {
    pub fn new(resolver: Arc<dyn Resolver>, local_domain: &str, public_proxy_url: &str) -> Self {
        Self {
            resolver,
            local_domain: local_domain.to_string(),
            public_proxy_url: public_proxy_url.to_string(),
        }
    }

    async fn target_registry(&self, name: &str) -> Result<Option<String>, Status> {
        let (_, domain) = split(name);
        let Some(domain) = domain else {
            return Ok(None);
        };
        if domain == self.local_domain {
            return Ok(None);
        }

        let urls = self.resolver.resolve(domain).await?;
        let registry = urls.registry.ok_or_else(|| {
            Status::not_found(format!("domain {} has no registry endpoint", domain))
        })?;
        Ok(Some(registry))
    }
}

#[async_trait]
impl NseRegistryStage for NseInterdomainForward {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status> {
        let Some(registry) = self.target_registry(&endpoint.name).await? else {
            return Ok(endpoint);
        };

        debug!(name = %endpoint.name, %registry, "forwarding endpoint registration");
        ctx.client_url = Some(registry);

        // the foreign cluster must come back through our public edge
        let mut outbound = endpoint.clone();
        outbound.url = self.public_proxy_url.clone();
        next.register(ctx, outbound).await?;

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
        let Some(registry) = self.target_registry(&endpoint.name).await? else {
            return Ok(());
        };

        ctx.client_url = Some(registry);
        let mut outbound = endpoint.clone();
        outbound.url = self.public_proxy_url.clone();
        next.unregister(ctx, outbound).await
    }
}

/// Forwards interdomain NS registrations towards the suffix domain.
pub struct NsInterdomainForward {
    resolver: Arc<dyn Resolver>,
    local_domain: String,
}

impl NsInterdomainForward {
    pub fn new(resolver: Arc<dyn Resolver>, local_domain: &str) -> Self {
        Self {
            resolver,
            local_domain: local_domain.to_string(),
        }
    }

    async fn target_registry(&self, name: &str) -> Result<Option<String>, Status> {
        let (_, domain) = split(name);
        let Some(domain) = domain else {
            return Ok(None);
        };
        if domain == self.local_domain {
            return Ok(None);
        }

        let urls = self.resolver.resolve(domain).await?;
        let registry = urls.registry.ok_or_else(|| {
            Status::not_found(format!("domain {} has no registry endpoint", domain))
        })?;
        Ok(Some(registry))
    }
}

#[async_trait]
impl NsRegistryStage for NsInterdomainForward {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<NetworkService, Status> {
        let Some(registry) = self.target_registry(&service.name).await? else {
            return Ok(service);
        };

        debug!(name = %service.name, %registry, "forwarding service registration");
        ctx.client_url = Some(registry);
        next.register(ctx, service.clone()).await?;

        Ok(service)
    }

    async fn find(
        &self,
        ctx: &mut RegistryContext,
        query: NetworkServiceQuery,
        next: NsNext,
    ) -> Result<NsResponseStream, Status> {
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut RegistryContext,
        service: NetworkService,
        next: NsNext,
    ) -> Result<(), Status> {
        let Some(registry) = self.target_registry(&service.name).await? else {
            return Ok(());
        };

        ctx.client_url = Some(registry);
        next.unregister(ctx, service).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NseRegistryChain;
    use crate::interdomain::{DomainUrls, StaticResolver};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CaptureNext {
        seen: Mutex<Vec<(Option<String>, NetworkServiceEndpoint)>>,
    }

    #[async_trait]
    impl NseRegistryStage for CaptureNext {
        async fn register(
            &self,
            ctx: &mut RegistryContext,
            endpoint: NetworkServiceEndpoint,
            _next: NseNext,
        ) -> Result<NetworkServiceEndpoint, Status> {
            self.seen
                .lock()
                .push((ctx.client_url.clone(), endpoint.clone()));
            Ok(endpoint)
        }

        async fn find(
            &self,
            _ctx: &mut RegistryContext,
            _query: NetworkServiceEndpointQuery,
            _next: NseNext,
        ) -> Result<NseResponseStream, Status> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn unregister(
            &self,
            _ctx: &mut RegistryContext,
            _endpoint: NetworkServiceEndpoint,
            _next: NseNext,
        ) -> Result<(), Status> {
            Ok(())
        }
    }

    fn resolver_with_floating() -> Arc<StaticResolver> {
        let resolver = StaticResolver::new();
        resolver.insert(
            "floating.domain",
            DomainUrls {
                nsmgr_proxy: None,
                registry: Some("tcp://127.0.0.1:6100".to_string()),
            },
        );
        Arc::new(resolver)
    }

    #[tokio::test]
    async fn test_interdomain_registration_is_forwarded_with_spliced_url() {
        let capture = Arc::new(CaptureNext::default());
        let chain = NseRegistryChain::new(vec![
            Arc::new(NseInterdomainForward::new(
                resolver_with_floating(),
                "cluster2",
                "tcp://proxy2.example:5100",
            )),
            capture.clone() as Arc<dyn NseRegistryStage>,
        ]);

        let mut ctx = RegistryContext::new();
        let endpoint = NetworkServiceEndpoint {
            name: "final-endpoint@floating.domain".to_string(),
            url: "tcp://127.0.0.1:9000".to_string(),
            ..Default::default()
        };

        let out = chain.register(&mut ctx, endpoint.clone()).await.unwrap();
        // the caller keeps its own URL
        assert_eq!(out.url, "tcp://127.0.0.1:9000");

        let seen = capture.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("tcp://127.0.0.1:6100"));
        assert_eq!(seen[0].1.url, "tcp://proxy2.example:5100");
    }

    #[tokio::test]
    async fn test_local_registration_is_not_forwarded() {
        let capture = Arc::new(CaptureNext::default());
        let chain = NseRegistryChain::new(vec![
            Arc::new(NseInterdomainForward::new(
                resolver_with_floating(),
                "cluster2",
                "tcp://proxy2.example:5100",
            )),
            capture.clone() as Arc<dyn NseRegistryStage>,
        ]);

        let mut ctx = RegistryContext::new();
        for name in ["plain-endpoint", "suffixed@cluster2"] {
            chain
                .register(
                    &mut ctx,
                    NetworkServiceEndpoint {
                        name: name.to_string(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        assert!(capture.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_domain_fails_registration() {
        let chain = NseRegistryChain::new(vec![Arc::new(NseInterdomainForward::new(
            resolver_with_floating(),
            "cluster2",
            "tcp://proxy2.example:5100",
        ))]);

        let mut ctx = RegistryContext::new();
        let err = chain
            .register(
                &mut ctx,
                NetworkServiceEndpoint {
                    name: "e@nowhere".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }
}
