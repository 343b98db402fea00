//! Per-host admission control.
//!
//! Every destination host gets its own minimum-interval gate, created lazily
//! on first use. `acquire` never fails; it only delays. Waiters on the same
//! host queue FIFO behind that host's mutex; requests to other hosts are
//! never delayed by it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

use crate::util::clock_jitter;

/// Configuration for the per-host gate.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum interval between consecutive requests to the same host.
    pub min_interval: Duration,

    /// Maximum random jitter added on top of `min_interval` (uniform [0, jitter]).
    ///
    /// De-synchronizes request timing. Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl RateLimitConfig {
    /// Derive the interval from a requests-per-minute budget.
    pub fn from_requests_per_minute(rpm: u32) -> Self {
        let rpm = rpm.max(1);
        Self {
            min_interval: Duration::from_millis(60_000 / u64::from(rpm)),
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn effective_interval(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.min_interval;
        }
        self.min_interval + Duration::from_millis(clock_jitter(self.jitter.as_millis() as u64))
    }
}

impl Default for RateLimitConfig {
    /// 10 requests per minute; a conservative default for job boards.
    fn default() -> Self {
        Self::from_requests_per_minute(10)
    }
}

/// Per-host gate state. The mutex doubles as the FIFO waiter queue:
/// tokio mutexes wake waiters in acquisition order.
type HostGate = Arc<Mutex<Option<Instant>>>;

/// Per-destination-host rate limiter.
///
/// Thread-safe and cheap to clone; clones share the same host table so all
/// tasks of one scraper go through the same gates.
#[derive(Clone)]
pub struct HostRateLimiter {
    config: RateLimitConfig,
    hosts: Arc<Mutex<HashMap<String, HostGate>>>,
}

impl HostRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the host key from a URL (scheme://host:port).
    pub fn host_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Block until a request to `host` is permitted, then record the slot.
    ///
    /// The sleep happens while holding the per-host gate, which serializes
    /// same-host callers; the host table lock is held only long enough to
    /// look up or create the gate.
    pub async fn acquire(&self, host: &str) {
        let gate = {
            let mut hosts = self.hosts.lock().await;
            Arc::clone(hosts.entry(host.to_string()).or_default())
        };

        let mut last = gate.lock().await;
        if let Some(prev) = *last {
            let required = self.config.effective_interval();
            let elapsed = prev.elapsed();
            if elapsed < required {
                let wait = required - elapsed;
                tracing::debug!(host = %host, wait_ms = %wait.as_millis(), "Rate limit wait");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Convenience: acquire using the host derived from a full URL.
    /// URLs with no parseable host skip admission control.
    pub async fn acquire_for_url(&self, url: &str) {
        if let Some(host) = Self::host_key(url) {
            self.acquire(&host).await;
        }
    }
}
