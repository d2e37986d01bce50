//! Per-endpoint idle connection pool. LIFO (the most recently returned connection is the next one
//! handed out — warmest first), capped per endpoint, with a background sweep evicting connections
//! that have sat idle past a configured bound. No cross-endpoint sharing: a slot for one base URI
//! is never handed out for another, even if both happen to resolve to the same host.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;

use exchange::MessageExchangeProtocol;
use wire::Endpoint;

pub type ClientProtocol = MessageExchangeProtocol<TlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle_per_endpoint: usize,
    pub max_idle_duration: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle_per_endpoint: 8,
            max_idle_duration: Duration::from_secs(120),
        }
    }
}

struct Slot {
    protocol: ClientProtocol,
    idle_since: Instant,
}

#[derive(Default)]
struct PerEndpoint {
    slots: VecDeque<Slot>,
}

/// Owns idle connections between transactions. A connection is owned by the pool only while
/// idle; [`crate::client::SecureClient::execute_transaction`] checks one out, uses it, and either
/// returns it here (clean completion) or drops it (any transport error).
pub struct ConnectionPool {
    config: PoolConfig,
    endpoints: Mutex<HashMap<String, PerEndpoint>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool {
            config,
            endpoints: Mutex::new(HashMap::new()),
        })
    }

    /// Takes the most recently idled connection for `endpoint`, if any.
    pub async fn take(&self, endpoint: &Endpoint) -> Option<ClientProtocol> {
        let mut endpoints = self.endpoints.lock().await;
        let per = endpoints.get_mut(endpoint.base_uri())?;
        per.slots.pop_back().map(|slot| slot.protocol)
    }

    /// Returns a connection that finished its transaction cleanly. Dropped silently (closing the
    /// underlying stream) if the endpoint's slot cap is already full.
    pub async fn put_back(&self, endpoint: &Endpoint, protocol: ClientProtocol) {
        let mut endpoints = self.endpoints.lock().await;
        let per = endpoints.entry(endpoint.base_uri().to_string()).or_default();
        if per.slots.len() >= self.config.max_idle_per_endpoint {
            return;
        }
        per.slots.push_back(Slot { protocol, idle_since: Instant::now() });
    }

    async fn evict_idle(&self) {
        let cutoff = self.config.max_idle_duration;
        let mut endpoints = self.endpoints.lock().await;
        let now = Instant::now();
        for per in endpoints.values_mut() {
            per.slots.retain(|slot| now.duration_since(slot.idle_since) < cutoff);
        }
        endpoints.retain(|_, per| !per.slots.is_empty());
    }

    /// Spawns the background idle-eviction sweep. Runs until `cancellation` fires.
    pub fn spawn_eviction_sweep(self: &Arc<Self>, interval: Duration, cancellation: CancellationToken) {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => return,
                    _ = tokio::time::sleep(interval) => pool.evict_idle().await,
                }
            }
        });
    }

    #[cfg(test)]
    pub async fn idle_count(&self, endpoint: &Endpoint) -> usize {
        let endpoints = self.endpoints.lock().await;
        endpoints.get(endpoint.base_uri()).map_or(0, |per| per.slots.len())
    }
}
