//! Browser profile simulation.
//!
//! Generates plausible request headers (rotating user agent, referer derived
//! from the target host) and human-like pacing between page loads. The goal
//! is to lower the bot-detection signal of an otherwise regular client, not
//! to defeat fingerprinting.

use std::sync::Arc;
use std::time::Duration;

use harvest_core::util::clock_jitter;
use url::Url;

const BUILTIN_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:126.0) Gecko/20100101 Firefox/126.0",
];

#[derive(Clone)]
pub struct BrowserProfile {
    user_agents: Arc<Vec<String>>,
    /// Pause after each fetched page, uniform in [min, max].
    pause_min: Duration,
    pause_max: Duration,
}

impl Default for BrowserProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserProfile {
    pub fn new() -> Self {
        Self {
            user_agents: Arc::new(BUILTIN_USER_AGENTS.iter().map(|s| s.to_string()).collect()),
            pause_min: Duration::from_millis(800),
            pause_max: Duration::from_millis(2500),
        }
    }

    /// Replace the built-in user-agent pool. Empty input keeps the built-ins.
    pub fn with_user_agents(mut self, agents: Vec<String>) -> Self {
        if !agents.is_empty() {
            self.user_agents = Arc::new(agents);
        }
        self
    }

    pub fn with_pause(mut self, min: Duration, max: Duration) -> Self {
        self.pause_min = min;
        self.pause_max = max.max(min);
        self
    }

    fn pick_user_agent(&self) -> &str {
        let idx = clock_jitter(self.user_agents.len() as u64) as usize;
        &self.user_agents[idx]
    }

    /// Header set for one request. The referer points at the target's own
    /// origin; a plausible prior navigation within the site.
    pub fn headers(&self, url: &str) -> Vec<(String, String)> {
        let mut headers = vec![
            ("User-Agent".to_string(), self.pick_user_agent().to_string()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                    .to_string(),
            ),
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
            ("DNT".to_string(), "1".to_string()),
        ];
        if let Ok(parsed) = Url::parse(url)
            && let Some(host) = parsed.host_str()
        {
            headers.push((
                "Referer".to_string(),
                format!("{}://{}/", parsed.scheme(), host),
            ));
        }
        headers
    }

    /// Sleep as a reader scrolling the fetched page would.
    pub async fn scroll_pause(&self) {
        let span = (self.pause_max - self.pause_min).as_millis() as u64;
        let pause = self.pause_min + Duration::from_millis(clock_jitter(span + 1));
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}
