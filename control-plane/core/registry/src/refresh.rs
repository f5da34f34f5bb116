// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client-side lease refresh: re-registers an endpoint before its lease
//! expires, through the stages downstream of this one.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tonic::{Status, async_trait};
use tracing::{debug, warn};

use weft_api::registry::v1::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};

use crate::chain::{NseNext, NseRegistryStage, NseResponseStream};
use crate::clock::from_timestamp;
use crate::context::RegistryContext;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(50);

/// Keeps registrations alive. After a successful Register the stage spawns a
/// loop that re-registers at one third of the remaining lease; Unregister
/// stops it.
#[derive(Default)]
pub struct Refresh {
    tasks: Mutex<HashMap<String, CancellationToken>>,
}

impl Refresh {
    pub fn new() -> Self {
        Self::default()
    }

    fn stop(&self, name: &str) {
        if let Some(token) = self.tasks.lock().remove(name) {
            token.cancel();
        }
    }

    fn interval_for(endpoint: &NetworkServiceEndpoint) -> Option<Duration> {
        let expires = endpoint
            .expiration_time
            .as_ref()
            .and_then(from_timestamp)?;
        let remaining = expires.duration_since(std::time::SystemTime::now()).ok()?;
        Some((remaining / 3).max(MIN_REFRESH_INTERVAL))
    }
}

impl Drop for Refresh {
    fn drop(&mut self) {
        for (_, token) in self.tasks.lock().drain() {
            token.cancel();
        }
    }
}

#[async_trait]
impl NseRegistryStage for Refresh {
    async fn register(
        &self,
        ctx: &mut RegistryContext,
        endpoint: NetworkServiceEndpoint,
        next: NseNext,
    ) -> Result<NetworkServiceEndpoint, Status> {
        let registered = next.register(ctx, endpoint).await?;

        // one refresh loop per endpoint name
        self.stop(&registered.name);

        if let Some(initial) = Self::interval_for(&registered) {
            let token = CancellationToken::new();
            self.tasks
                .lock()
                .insert(registered.name.clone(), token.clone());

            let next = next.clone();
            let mut current = registered.clone();
            tokio::spawn(async move {
                let mut interval = initial;
                loop {
                    tokio::select! {
                        _ = time::sleep(interval) => {
                            let mut ctx = RegistryContext::with_cancel(token.clone());
                            match next.register(&mut ctx, current.clone()).await {
                                Ok(renewed) => {
                                    interval = Refresh::interval_for(&renewed)
                                        .unwrap_or(interval);
                                    current = renewed;
                                    debug!(name = %current.name, "endpoint lease renewed");
                                }
                                Err(e) => {
                                    warn!(name = %current.name, error = %e, "endpoint lease renewal failed");
                                }
                            }
                        }
                        _ = token.cancelled() => {
                            break;
                        }
                    }
                }
            });
        }

        Ok(registered)
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
        self.stop(&endpoint.name);
        next.unregister(ctx, endpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NseRegistryChain;
    use crate::clock::to_timestamp;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLease {
        registers: AtomicUsize,
        lease: Duration,
    }

    #[async_trait]
    impl NseRegistryStage for CountingLease {
        async fn register(
            &self,
            _ctx: &mut RegistryContext,
            mut endpoint: NetworkServiceEndpoint,
            _next: NseNext,
        ) -> Result<NetworkServiceEndpoint, Status> {
            self.registers.fetch_add(1, Ordering::SeqCst);
            endpoint.expiration_time =
                Some(to_timestamp(std::time::SystemTime::now() + self.lease));
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

    #[tokio::test]
    async fn test_refresh_re_registers_before_expiry() {
        let counting = Arc::new(CountingLease {
            registers: AtomicUsize::new(0),
            lease: Duration::from_millis(200),
        });
        let chain = NseRegistryChain::new(vec![
            Arc::new(Refresh::new()),
            counting.clone() as Arc<dyn NseRegistryStage>,
        ]);

        let mut ctx = RegistryContext::new();
        chain
            .register(
                &mut ctx,
                NetworkServiceEndpoint {
                    name: "nse-1".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        time::sleep(Duration::from_millis(400)).await;
        assert!(counting.registers.load(Ordering::SeqCst) >= 3);

        // unregister stops the loop
        chain
            .unregister(
                &mut ctx,
                NetworkServiceEndpoint {
                    name: "nse-1".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let settled = counting.registers.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(counting.registers.load(Ordering::SeqCst), settled);
    }
}
