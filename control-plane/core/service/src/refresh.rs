// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Periodic re-Request from the client side.
//!
//! After a successful Request the stage schedules a re-Request at one third
//! of the time left before the earliest path token expires, through the
//! late-bound chain head. A refresh preserves the connection id and path
//! length and advances expirations; Close cancels the loop.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tonic::{Status, async_trait};
use tracing::{debug, warn};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};
use weft_registry::clock::from_timestamp;

use crate::chain::{LateBound, NetworkServiceStage, Next};
use crate::context::CallContext;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(50);

pub struct Refresh {
    client: Arc<LateBound>,
    tasks: Mutex<HashMap<String, CancellationToken>>,
}

impl Refresh {
    pub fn new(client: Arc<LateBound>) -> Self {
        Self {
            client,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn interval_for(conn: &Connection) -> Option<Duration> {
        let earliest = conn
            .path
            .as_ref()?
            .path_segments
            .iter()
            .filter_map(|s| s.expires.as_ref().and_then(from_timestamp))
            .min()?;
        let remaining = earliest.duration_since(SystemTime::now()).ok()?;
        Some((remaining / 3).max(MIN_REFRESH_INTERVAL))
    }

    fn stop(&self, conn_id: &str) {
        if let Some(token) = self.tasks.lock().remove(conn_id) {
            token.cancel();
        }
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
impl NetworkServiceStage for Refresh {
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

        if reissue {
            return Ok(conn);
        }

        let Some(initial) = Self::interval_for(&conn) else {
            return Ok(conn);
        };

        let id = conn.id.clone();
        let token = CancellationToken::new();
        if let Some(previous) = self.tasks.lock().insert(id.clone(), token.clone()) {
            previous.cancel();
        }

        let client = self.client.clone();
        // re-Requests enter the chain from this element's position
        let mut refresh_conn = conn.clone();
        if let (Some(index), Some(path)) = (entry_index, refresh_conn.path.as_mut()) {
            path.index = index;
        }
        let mut request = NetworkServiceRequest {
            connection: Some(refresh_conn),
            mechanism_preferences: preferences,
        };

        tokio::spawn(async move {
            let mut interval = initial;
            loop {
                tokio::select! {
                    _ = time::sleep(interval) => {}
                    _ = token.cancelled() => break,
                }

                let Some(client) = client.get() else {
                    continue;
                };

                let mut ctx = CallContext::reissue(token.child_token());
                match client.request(&mut ctx, request.clone(), Next::empty()).await {
                    Ok(conn) => {
                        debug!(conn_id = %id, "connection refreshed");
                        interval = Self::interval_for(&conn).unwrap_or(interval);
                        request.connection = Some(conn);
                    }
                    Err(e) => {
                        // heal owns recovery; keep trying on the same cadence
                        warn!(conn_id = %id, error = %e, "refresh failed");
                    }
                }
            }
        });

        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        self.stop(&conn.id);
        next.close(ctx, conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_api::networkservice::v1::{Path, PathSegment};
    use weft_registry::clock::to_timestamp;

    struct Stamping {
        requests: AtomicUsize,
        lifetime: Duration,
    }

    #[async_trait]
    impl NetworkServiceStage for Stamping {
        async fn request(
            &self,
            _ctx: &mut CallContext,
            request: NetworkServiceRequest,
            _next: Next,
        ) -> Result<Connection, Status> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let mut conn = request.connection.unwrap_or_default();
            conn.path = Some(Path {
                index: 0,
                path_segments: vec![PathSegment {
                    name: "nsc".to_string(),
                    token: "tok".to_string(),
                    expires: Some(to_timestamp(SystemTime::now() + self.lifetime)),
                    ..Default::default()
                }],
            });
            Ok(conn)
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

    #[tokio::test]
    async fn test_refresh_re_requests_before_expiry() {
        let stamping = Arc::new(Stamping {
            requests: AtomicUsize::new(0),
            lifetime: Duration::from_millis(300),
        });

        let late = LateBound::new();
        let chain = Arc::new(Chain::new(vec![
            Arc::new(Refresh::new(late.clone())) as Arc<dyn NetworkServiceStage>,
            stamping.clone() as Arc<dyn NetworkServiceStage>,
        ]));
        late.bind(chain.clone() as Arc<dyn NetworkServiceStage>);

        let mut ctx = CallContext::new();
        let conn = chain
            .request(
                &mut ctx,
                NetworkServiceRequest {
                    connection: Some(Connection {
                        id: "conn-1".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        time::sleep(Duration::from_millis(400)).await;
        assert!(stamping.requests.load(Ordering::SeqCst) >= 3);

        chain.close(&mut ctx, conn).await.unwrap();
        let settled = stamping.requests.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(stamping.requests.load(Ordering::SeqCst), settled);
    }
}
