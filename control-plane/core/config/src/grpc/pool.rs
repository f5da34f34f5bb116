// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::debug;

use super::client::ClientConfig;
use super::errors::ConfigError;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// One pooled channel: the lazy tonic channel for a target URL, the set of
/// connection ids currently multiplexed over it, and the last time it was
/// handed out or released.
#[derive(Debug)]
struct PoolEntry {
    channel: Channel,
    ids: Mutex<HashSet<String>>,
    last_use: Mutex<Instant>,
}

impl PoolEntry {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            ids: Mutex::new(HashSet::new()),
            last_use: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_use.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_use.lock().elapsed()
    }

    fn in_use(&self) -> usize {
        self.ids.lock().len()
    }
}

/// Pool of outgoing channels keyed by target URL.
///
/// Channels are created lazily under the pool lock, so there is exactly one
/// channel (and therefore at most one in-flight dial) per URL; tonic
/// multiplexes every logical request onto it. Entries with no tracked
/// connection ids are disposed once they stay idle past the grace period.
#[derive(Debug)]
pub struct ChannelPool {
    entries: Mutex<HashMap<String, Arc<PoolEntry>>>,
    template: ClientConfig,
    idle_timeout: Duration,
    token: CancellationToken,
}

impl ChannelPool {
    /// Creates a pool stamping channels out of the given template
    /// configuration (timeouts and keepalive apply to every target URL) and
    /// starts the idle reaper.
    pub fn new(template: ClientConfig) -> Arc<Self> {
        Self::with_idle_timeout(template, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(template: ClientConfig, idle_timeout: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            template,
            idle_timeout,
            token: CancellationToken::new(),
        });

        Self::spawn_reaper(Arc::downgrade(&pool), pool.token.clone(), idle_timeout);

        pool
    }

    fn spawn_reaper(pool: Weak<Self>, token: CancellationToken, idle_timeout: Duration) {
        let period = (idle_timeout / 4).max(Duration::from_millis(10));

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else {
                            break;
                        };
                        pool.evict_idle();
                    }
                    _ = token.cancelled() => {
                        break;
                    }
                }
            }
        });
    }

    fn evict_idle(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|endpoint, entry| {
            let keep = entry.in_use() > 0 || entry.idle_for() < self.idle_timeout;
            if !keep {
                debug!(%endpoint, "disposing idle channel");
            }
            keep
        });
    }

    fn entry(&self, endpoint: &str) -> Result<Arc<PoolEntry>, ConfigError> {
        if self.token.is_cancelled() {
            return Err(ConfigError::PoolClosed);
        }

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(endpoint) {
            entry.touch();
            return Ok(entry.clone());
        }

        let channel = self.template.for_endpoint(endpoint).to_channel()?;
        let entry = Arc::new(PoolEntry::new(channel));
        entries.insert(endpoint.to_string(), entry.clone());
        debug!(%endpoint, "pooled new channel");

        Ok(entry)
    }

    /// Looks up or creates the channel for a target URL.
    pub fn checkout(&self, endpoint: &str) -> Result<Channel, ConfigError> {
        Ok(self.entry(endpoint)?.channel.clone())
    }

    /// Associates a connection id with the URL's channel. Returns true on the
    /// first registration of that id.
    pub fn track(&self, endpoint: &str, conn_id: &str) -> Result<bool, ConfigError> {
        let entry = self.entry(endpoint)?;
        let first = entry.ids.lock().insert(conn_id.to_string());
        Ok(first)
    }

    /// Releases a connection id. The idle grace period starts once the last
    /// id is gone.
    pub fn untrack(&self, endpoint: &str, conn_id: &str) {
        let entries = self.entries.lock();
        if let Some(entry) = entries.get(endpoint) {
            entry.ids.lock().remove(conn_id);
            entry.touch();
        }
    }

    /// Number of connection ids multiplexed over the URL's channel.
    pub fn in_use(&self, endpoint: &str) -> usize {
        self.entries
            .lock()
            .get(endpoint)
            .map(|e| e.in_use())
            .unwrap_or(0)
    }

    /// Number of live pooled channels.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ChannelPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn template() -> ClientConfig {
        ClientConfig::default().with_connect_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    #[traced_test]
    async fn test_checkout_reuses_channel() {
        let pool = ChannelPool::new(template());

        pool.checkout("tcp://127.0.0.1:7001").unwrap();
        pool.checkout("tcp://127.0.0.1:7001").unwrap();
        assert_eq!(pool.len(), 1);

        pool.checkout("tcp://127.0.0.1:7002").unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_checkout_concurrent_single_entry() {
        let pool = ChannelPool::new(template());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.checkout("tcp://127.0.0.1:7001").unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_track_untrack() {
        let pool = ChannelPool::new(template());

        assert!(pool.track("tcp://127.0.0.1:7001", "conn-1").unwrap());
        assert!(!pool.track("tcp://127.0.0.1:7001", "conn-1").unwrap());
        assert!(pool.track("tcp://127.0.0.1:7001", "conn-2").unwrap());
        assert_eq!(pool.in_use("tcp://127.0.0.1:7001"), 2);

        pool.untrack("tcp://127.0.0.1:7001", "conn-1");
        pool.untrack("tcp://127.0.0.1:7001", "conn-2");
        assert_eq!(pool.in_use("tcp://127.0.0.1:7001"), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_idle_entries_are_reaped() {
        let pool = ChannelPool::with_idle_timeout(template(), Duration::from_millis(50));

        pool.track("tcp://127.0.0.1:7001", "conn-1").unwrap();
        pool.untrack("tcp://127.0.0.1:7001", "conn-1");
        assert_eq!(pool.len(), 1);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_entries_in_use_survive_reaper() {
        let pool = ChannelPool::with_idle_timeout(template(), Duration::from_millis(50));

        pool.track("tcp://127.0.0.1:7001", "conn-1").unwrap();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_bad_endpoint_surfaces_error() {
        let pool = ChannelPool::new(template());
        assert!(pool.checkout("ftp://nope").is_err());
    }
}
