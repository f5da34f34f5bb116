// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Per-connection serialization: concurrent Request/Close calls for the
//! same connection queue on one async lock at this stage's entry.
//!
//! The lock is keyed by connection id and path position, not id alone: a
//! request that loops back through the same element (NSMgr via forwarder)
//! arrives at a deeper path index and must not deadlock against its own
//! outer traversal.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tonic::{Status, async_trait};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

#[derive(Default)]
pub struct Serialize {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Serialize {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(conn: Option<&Connection>) -> String {
        let Some(conn) = conn else {
            return String::new();
        };
        let position = conn.path.as_ref().map(|p| p.index).unwrap_or(0);
        format!("{}#{}", conn.id, position)
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl NetworkServiceStage for Serialize {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let key = Self::key(request.connection.as_ref());
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        let key = Self::key(Some(&conn));
        let lock = self.lock_for(&key);
        let res = {
            let _guard = lock.lock().await;
            next.close(ctx, conn).await
        };
        drop(lock);

        // evict only when nobody else holds the entry: a waiter parked on
        // the lock still owns a clone, and removing under it would let a
        // third caller mint a fresh lock and overlap the critical section
        let mut locks = self.locks.lock();
        if locks
            .get(&key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&key);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Overlapping {
        in_flight: AtomicUsize,
        overlapped: AtomicUsize,
    }

    impl Overlapping {
        async fn enter(&self) {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl NetworkServiceStage for Overlapping {
        async fn request(
            &self,
            _ctx: &mut CallContext,
            request: NetworkServiceRequest,
            _next: Next,
        ) -> Result<Connection, Status> {
            self.enter().await;
            Ok(request.connection.unwrap_or_default())
        }

        async fn close(
            &self,
            _ctx: &mut CallContext,
            _conn: Connection,
            _next: Next,
        ) -> Result<(), Status> {
            self.enter().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_id_requests_are_serialized() {
        let probe = Arc::new(Overlapping {
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
        });
        let chain = Arc::new(Chain::new(vec![
            Arc::new(Serialize::new()) as Arc<dyn NetworkServiceStage>,
            probe.clone() as Arc<dyn NetworkServiceStage>,
        ]));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                let mut ctx = CallContext::new();
                chain
                    .request(
                        &mut ctx,
                        NetworkServiceRequest {
                            connection: Some(Connection {
                                id: "same".to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(probe.overlapped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_racing_request_stays_serialized() {
        let probe = Arc::new(Overlapping {
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
        });
        let chain = Arc::new(Chain::new(vec![
            Arc::new(Serialize::new()) as Arc<dyn NetworkServiceStage>,
            probe.clone() as Arc<dyn NetworkServiceStage>,
        ]));

        // closes evict the lock entry on their way out; fresh requests and
        // closes racing them for the same id and position must still queue
        let mut handles = Vec::new();
        for i in 0..8 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                let mut ctx = CallContext::new();
                let conn = Connection {
                    id: "same".to_string(),
                    ..Default::default()
                };
                if i % 2 == 0 {
                    chain.close(&mut ctx, conn).await.unwrap();
                } else {
                    chain
                        .request(
                            &mut ctx,
                            NetworkServiceRequest {
                                connection: Some(conn),
                                ..Default::default()
                            },
                        )
                        .await
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(probe.overlapped.load(Ordering::SeqCst), 0);
    }
}
