// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Liveness monitoring and recovery for established connections.
//!
//! Each successful Request arms a monitor that periodically re-drives the
//! request through the chain head (late-bound, tagged `reissue` so the probe
//! does not arm a second monitor). A failed probe moves the connection from
//! HEALTHY to RESTORING: bounded retries with exponential backoff and
//! jitter. Success returns to HEALTHY; exhaustion is CLOSED — state is
//! dropped and the failure logged. Heal recovers only `unavailable` and
//! `deadline-exceeded`, never originates a Close, and a healed connection
//! keeps its id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status, async_trait};
use tracing::{debug, warn};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::chain::{LateBound, NetworkServiceStage, Next};
use crate::context::CallContext;

/// What to do when the liveness probe fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnRestore {
    /// Reissue the request through the chain until the retry budget runs out.
    Restore,
    /// Drop the monitor quietly.
    Ignore,
}

pub struct Heal {
    on_heal: Arc<LateBound>,
    on_restore: OnRestore,
    probe_interval: Duration,
    backoff_base: Duration,
    backoff_max: Duration,
    max_retries: u32,
    conns: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Heal {
    pub fn new(on_heal: Arc<LateBound>, on_restore: OnRestore) -> Self {
        Self {
            on_heal,
            on_restore,
            probe_interval: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
            max_retries: 5,
            conns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_probe_interval(mut self, probe_interval: Duration) -> Self {
        self.probe_interval = probe_interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// True while a monitor runs for the connection id.
    pub fn monitored(&self, conn_id: &str) -> bool {
        self.conns.lock().contains_key(conn_id)
    }

    fn recoverable(status: &Status) -> bool {
        matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.backoff_max);
        let jitter = rand::rng().random_range(0..=exp.as_millis().max(1) as u64 / 2);
        exp + Duration::from_millis(jitter)
    }

    fn arm(&self, conn: Connection, preferences: Vec<weft_api::networkservice::v1::Mechanism>) {
        let id = conn.id.clone();
        let token = CancellationToken::new();

        if let Some(previous) = self.conns.lock().insert(id.clone(), token.clone()) {
            previous.cancel();
        }

        let on_heal = self.on_heal.clone();
        let on_restore = self.on_restore;
        let probe_interval = self.probe_interval;
        let max_retries = self.max_retries;
        let conns = self.conns.clone();
        let backoff: Vec<Duration> = (0..max_retries).map(|a| self.backoff_delay(a)).collect();

        tokio::spawn(async move {
            let mut request = NetworkServiceRequest {
                connection: Some(conn),
                mechanism_preferences: preferences,
            };

            'monitor: loop {
                tokio::select! {
                    _ = time::sleep(probe_interval) => {}
                    _ = token.cancelled() => break 'monitor,
                }

                let Some(client) = on_heal.get() else {
                    continue;
                };

                let mut ctx = CallContext::reissue(token.child_token());
                match client.request(&mut ctx, request.clone(), Next::empty()).await {
                    Ok(conn) => {
                        request.connection = Some(conn);
                    }
                    Err(e) if Self::recoverable(&e) => {
                        debug!(conn_id = %id, error = %e, "liveness probe failed, restoring");

                        if on_restore == OnRestore::Ignore {
                            conns.lock().remove(&id);
                            break 'monitor;
                        }

                        let mut restored = false;
                        for delay in &backoff {
                            tokio::select! {
                                _ = time::sleep(*delay) => {}
                                _ = token.cancelled() => break 'monitor,
                            }

                            let mut ctx = CallContext::reissue(token.child_token());
                            match client
                                .request(&mut ctx, request.clone(), Next::empty())
                                .await
                            {
                                Ok(conn) => {
                                    debug!(conn_id = %id, "connection restored");
                                    request.connection = Some(conn);
                                    restored = true;
                                    break;
                                }
                                Err(e) if Self::recoverable(&e) => {
                                    debug!(conn_id = %id, error = %e, "restore attempt failed");
                                }
                                Err(e) => {
                                    warn!(conn_id = %id, error = %e, "restore rejected");
                                    break;
                                }
                            }
                        }

                        if !restored {
                            warn!(conn_id = %id, "restore budget exhausted, giving up");
                            conns.lock().remove(&id);
                            break 'monitor;
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = %id, error = %e, "liveness probe rejected, giving up");
                        conns.lock().remove(&id);
                        break 'monitor;
                    }
                }
            }
        });
    }
}

impl Drop for Heal {
    fn drop(&mut self) {
        for (_, token) in self.conns.lock().drain() {
            token.cancel();
        }
    }
}

#[async_trait]
impl NetworkServiceStage for Heal {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let reissue = ctx.reissue;
        let preferences = request.mechanism_preferences.clone();
        let entry_index = request
            .connection
            .as_ref()
            .and_then(|c| c.path.as_ref())
            .map(|p| p.index);

        let conn = next.request(ctx, request).await?;

        if !reissue {
            // probes re-enter the chain from this element's position, not
            // from wherever the deepest element left the index
            let mut probe_conn = conn.clone();
            if let (Some(index), Some(path)) = (entry_index, probe_conn.path.as_mut()) {
                path.index = index;
            }
            self.arm(probe_conn, preferences);
        }

        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        if let Some(token) = self.conns.lock().remove(&conn.id) {
            token.cancel();
        }
        next.close(ctx, conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tracing_test::traced_test;

    struct Flaky {
        failing: AtomicBool,
        requests: AtomicUsize,
    }

    #[async_trait]
    impl NetworkServiceStage for Flaky {
        async fn request(
            &self,
            _ctx: &mut CallContext,
            request: NetworkServiceRequest,
            _next: Next,
        ) -> Result<Connection, Status> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Status::unavailable("peer gone"));
            }
            Ok(request.connection.unwrap_or_default())
        }

        async fn close(
            &self,
            _ctx: &mut CallContext,
            _conn: Connection,
            _next: Next,
        ) -> Result<(), Status> {
            Ok(())
        }
    }

    fn request_with_id(id: &str) -> NetworkServiceRequest {
        NetworkServiceRequest {
            connection: Some(Connection {
                id: id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build(flaky: Arc<Flaky>, on_restore: OnRestore) -> (Arc<Chain>, Arc<Heal>) {
        let late = LateBound::new();
        let heal = Arc::new(
            Heal::new(late.clone(), on_restore)
                .with_probe_interval(Duration::from_millis(30))
                .with_backoff(Duration::from_millis(10), Duration::from_millis(50))
                .with_max_retries(10),
        );
        let chain = Arc::new(Chain::new(vec![
            heal.clone() as Arc<dyn NetworkServiceStage>,
            flaky as Arc<dyn NetworkServiceStage>,
        ]));
        late.bind(chain.clone() as Arc<dyn NetworkServiceStage>);
        (chain, heal)
    }

    #[tokio::test]
    #[traced_test]
    async fn test_restore_recovers_after_outage() {
        let flaky = Arc::new(Flaky {
            failing: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        });
        let (chain, heal) = build(flaky.clone(), OnRestore::Restore);

        let mut ctx = CallContext::new();
        let conn = chain
            .request(&mut ctx, request_with_id("conn-1"))
            .await
            .unwrap();
        assert_eq!(conn.id, "conn-1");
        assert!(heal.monitored("conn-1"));

        // outage: probes fail, retries keep coming
        flaky.failing.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_millis(120)).await;

        // recovery: a retry lands and the monitor stays armed
        flaky.failing.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;

        assert!(heal.monitored("conn-1"));
        assert!(flaky.requests.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ignore_drops_monitor_on_failure() {
        let flaky = Arc::new(Flaky {
            failing: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        });
        let (chain, heal) = build(flaky.clone(), OnRestore::Ignore);

        let mut ctx = CallContext::new();
        chain
            .request(&mut ctx, request_with_id("conn-1"))
            .await
            .unwrap();

        flaky.failing.store(true, Ordering::SeqCst);
        time::sleep(Duration::from_millis(200)).await;

        assert!(!heal.monitored("conn-1"));
    }

    #[tokio::test]
    async fn test_close_cancels_monitor() {
        let flaky = Arc::new(Flaky {
            failing: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        });
        let (chain, heal) = build(flaky.clone(), OnRestore::Restore);

        let mut ctx = CallContext::new();
        let conn = chain
            .request(&mut ctx, request_with_id("conn-1"))
            .await
            .unwrap();
        assert!(heal.monitored("conn-1"));

        chain.close(&mut ctx, conn).await.unwrap();
        assert!(!heal.monitored("conn-1"));

        // no probes trickle in after close
        let settled = flaky.requests.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(flaky.requests.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn test_reissued_requests_do_not_rearm() {
        let flaky = Arc::new(Flaky {
            failing: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        });
        let (chain, heal) = build(flaky.clone(), OnRestore::Restore);

        let mut ctx = CallContext::reissue(CancellationToken::new());
        chain
            .request(&mut ctx, request_with_id("conn-9"))
            .await
            .unwrap();
        assert!(!heal.monitored("conn-9"));
    }
}
