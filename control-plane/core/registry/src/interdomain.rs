// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! `name@domain` identifiers and domain resolution.
//!
//! A name carrying an `@domain` suffix belongs to another cluster. The
//! [`Resolver`] collaborator maps a domain to the URLs of its edge: the
//! NSMgr-Proxy accepting connection requests and the registry accepting
//! forwarded registrations (for a floating registry the latter is the
//! registry itself).

use std::collections::HashMap;

use parking_lot::RwLock;
use tonic::{Status, async_trait};

/// True when the identifier names something in another cluster.
pub fn is_interdomain(name: &str) -> bool {
    name.contains('@')
}

/// Splits `name@domain` into the local part and the optional domain.
pub fn split(name: &str) -> (&str, Option<&str>) {
    match name.split_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (name, None),
    }
}

pub fn join(name: &str, domain: &str) -> String {
    format!("{}@{}", name, domain)
}

/// URLs a domain resolves to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainUrls {
    /// Edge proxy accepting connection requests for the domain.
    pub nsmgr_proxy: Option<String>,
    /// Registry accepting forwarded registrations and finds.
    pub registry: Option<String>,
}

/// DNS-like domain resolution. Implementations may be backed by real DNS SRV
/// lookups, a static map, or a test fake.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<DomainUrls, Status>;
}

/// Static map resolver.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: RwLock<HashMap<String, DomainUrls>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, domain: &str, urls: DomainUrls) {
        self.entries.write().insert(domain.to_string(), urls);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, domain: &str) -> Result<DomainUrls, Status> {
        self.entries
            .read()
            .get(domain)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("domain {} not resolvable", domain)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_join() {
        assert_eq!(split("my-service"), ("my-service", None));
        assert_eq!(
            split("my-service@cluster2"),
            ("my-service", Some("cluster2"))
        );
        assert_eq!(
            split("endpoint@floating.domain"),
            ("endpoint", Some("floating.domain"))
        );
        assert_eq!(join("svc", "cluster1"), "svc@cluster1");
        assert!(is_interdomain("a@b"));
        assert!(!is_interdomain("a"));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new();
        resolver.insert(
            "cluster2",
            DomainUrls {
                nsmgr_proxy: Some("tcp://127.0.0.1:5002".to_string()),
                registry: Some("tcp://127.0.0.1:6002".to_string()),
            },
        );

        let urls = resolver.resolve("cluster2").await.unwrap();
        assert_eq!(urls.nsmgr_proxy.as_deref(), Some("tcp://127.0.0.1:5002"));

        let err = resolver.resolve("cluster3").await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }
}
