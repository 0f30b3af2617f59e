//! Companion-process endpoint discovery
//!
//! Resolves the port the companion is listening on: persisted-cache fast
//! path first, then a sequential ascending scan of the configured range
//! against `/bridge-port`, then the same scan against the legacy `/port`
//! path. Resolution failure is degraded mode, not fatal; the caller falls
//! back to the configured default port.

mod cache;
mod probe;

pub use cache::PortCache;
pub use probe::{PortProber, BRIDGE_PORT_PATH, LEGACY_PORT_PATH};

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;
use crate::{Error, Result};

/// The companion is always a loopback peer
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// A resolved control endpoint for the companion process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn loopback(port: u16) -> Self {
        Self {
            host: LOOPBACK_HOST.to_string(),
            port,
        }
    }

    /// WebSocket URL for the persistent channel
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

/// Endpoint resolver with a persisted-cache fast path
pub struct PortResolver {
    cache: PortCache,
    prober: PortProber,
    start_port: u16,
    end_port: u16,
}

impl PortResolver {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            cache: PortCache::new(config.port_cache_path()),
            prober: PortProber::new(Duration::from_millis(config.discovery.probe_timeout_ms))?,
            start_port: config.discovery.start_port,
            end_port: config.discovery.end_port,
        })
    }

    /// Resolve the companion endpoint, stopping at the first success.
    ///
    /// The cache-hit path trusts the port the server reports over the probed
    /// guess and does not rewrite the cache; only discovery writes it.
    pub async fn resolve(&self) -> Result<Endpoint> {
        if let Some(cached) = self.cache.load() {
            match self.prober.probe(cached, BRIDGE_PORT_PATH).await {
                Ok(confirmed) => {
                    info!(cached, port = confirmed, "bridge port confirmed from cache");
                    return Ok(Endpoint::loopback(confirmed));
                }
                Err(e) => {
                    debug!(port = cached, "cached bridge port failed validation: {e}");
                    self.cache.clear();
                }
            }
        }

        for path in [BRIDGE_PORT_PATH, LEGACY_PORT_PATH] {
            if let Some(endpoint) = self.scan(path).await {
                return Ok(endpoint);
            }
        }

        Err(Error::Discovery(format!(
            "no bridge endpoint found on ports {}-{}",
            self.start_port, self.end_port
        )))
    }

    /// Scan the configured range in ascending order; first port answering
    /// 200 with a positive-integer body wins and is persisted.
    async fn scan(&self, path: &str) -> Option<Endpoint> {
        for port in self.start_port..=self.end_port {
            match self.prober.probe(port, path).await {
                Ok(confirmed) => {
                    if let Err(e) = self.cache.store(confirmed) {
                        warn!("failed to persist discovered bridge port: {e}");
                    }
                    info!(scanned = port, port = confirmed, path, "discovered bridge port");
                    return Some(Endpoint::loopback(confirmed));
                }
                Err(e) => trace!(port, path, "probe miss: {e}"),
            }
        }
        None
    }
}
