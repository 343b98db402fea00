//! Page fetching.
//!
//! [`ReqwestPageFetcher`] performs exactly one HTTP exchange. [`PageClient`]
//! layers the full per-page pipeline on top of any [`PageFetcher`]:
//! cache check → rate-limit admission → profile headers → send (with retry)
//! → CAPTCHA detection → cache store → pacing delay.

use std::time::Duration;

use harvest_core::cache::ResponseCache;
use harvest_core::error::AppError;
use harvest_core::ratelimit::HostRateLimiter;
use harvest_core::retry::RetryPolicy;
use harvest_core::stats::StatsRecorder;
use harvest_core::traits::{FetchedPage, PageFetcher, PageRequest};
use reqwest::Client;
use url::Url;

use crate::captcha::CaptchaHandler;
use crate::profile::BrowserProfile;

/// HTTP fetcher using reqwest, with configurable timeout and optional proxy.
#[derive(Clone)]
pub struct ReqwestPageFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestPageFetcher {
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self, AppError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| AppError::ConfigError(format!("invalid proxy '{proxy_url}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

impl PageFetcher for ReqwestPageFetcher {
    async fn fetch(&self, req: &PageRequest) -> Result<FetchedPage, AppError> {
        let mut request = self.client.get(&req.url);
        for (name, value) in &req.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 403 || status.as_u16() == 429 {
            return Err(AppError::AccessDenied {
                host: host_of(&req.url),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                req.url
            )));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let content = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        Ok(FetchedPage {
            url: req.url.clone(),
            content,
            status_code: status.as_u16(),
            headers,
        })
    }
}

/// The per-page fetch pipeline shared by all site scrapers.
///
/// Owns its rate limiter, cache handle, and stats recorder; cheap to clone,
/// clones share the same state so concurrent per-term tasks stay within one
/// budget.
#[derive(Clone)]
pub struct PageClient<F: PageFetcher> {
    fetcher: F,
    limiter: HostRateLimiter,
    stats: StatsRecorder,
    cache: Option<ResponseCache>,
    profile: Option<BrowserProfile>,
    captcha: CaptchaHandler,
    retry: RetryPolicy,
}

impl<F: PageFetcher> PageClient<F> {
    pub fn new(fetcher: F, limiter: HostRateLimiter) -> Self {
        Self {
            fetcher,
            limiter,
            stats: StatsRecorder::new(),
            cache: None,
            profile: None,
            captcha: CaptchaHandler::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_profile(mut self, profile: BrowserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_captcha(mut self, handler: CaptchaHandler) -> Self {
        self.captcha = handler;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Fetch one page through the full pipeline, returning its body.
    pub async fn get_page(&self, url: &str) -> Result<String, AppError> {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(url).await {
                self.stats.record_cache_hit();
                tracing::debug!(url = %url, "Cache hit");
                return Ok(entry.content);
            }
            self.stats.record_cache_miss();
        }

        self.limiter.acquire_for_url(url).await;

        let headers = self
            .profile
            .as_ref()
            .map(|p| p.headers(url))
            .unwrap_or_default();
        let request = PageRequest::new(url).with_headers(headers);

        self.stats.record_request();
        let page = match self.retry.run(|| self.fetcher.fetch(&request)).await {
            Ok(page) => {
                self.stats.record_success();
                page
            }
            Err(e) => {
                self.stats.record_failure();
                return Err(e);
            }
        };

        // Challenge pages are handled best-effort: log, try the solver, and
        // hand the page back either way; extraction will find zero cards.
        if let Some(info) = self.captcha.detect(&page.content) {
            self.stats.record_captcha();
            tracing::warn!(url = %url, kind = info.kind.as_str(), "CAPTCHA challenge encountered");
            if self.captcha.handle(&info, url).await.is_some() {
                self.stats.record_captcha_solved();
            }
        }

        if let Some(cache) = &self.cache {
            cache
                .set(url, page.content.clone(), page.headers.clone(), page.status_code)
                .await;
        }

        if let Some(profile) = &self.profile {
            profile.scroll_pause().await;
        }

        Ok(page.content)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use harvest_core::cache::CacheConfig;
    use harvest_core::ratelimit::RateLimitConfig;
    use harvest_core::testutil::{MockPageFetcher, MockResponse};

    use super::*;

    fn unthrottled() -> HostRateLimiter {
        HostRateLimiter::new(RateLimitConfig {
            min_interval: Duration::ZERO,
            jitter: Duration::ZERO,
        })
    }

    fn cache_in(dir: &Path) -> ResponseCache {
        ResponseCache::new(CacheConfig::new(dir).with_max_age(Duration::from_secs(60))).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_and_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockPageFetcher::with_page("<html>jobs</html>");
        let client = PageClient::new(fetcher.clone(), unthrottled()).with_cache(cache_in(dir.path()));

        let first = client.get_page("https://example.com/jobs").await.unwrap();
        let second = client.get_page("https://example.com/jobs").await.unwrap();

        assert_eq!(first, "<html>jobs</html>");
        assert_eq!(second, "<html>jobs</html>");
        // Second request was answered from cache, not the network.
        assert_eq!(fetcher.request_count(), 1);

        let stats = client.stats().finish_batch();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.requests_made, 1);
        assert_eq!(stats.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_failure_increments_stats_and_propagates() {
        let fetcher = MockPageFetcher::new();
        fetcher.route("denied", MockResponse::Deny);
        let client = PageClient::new(fetcher, unthrottled());

        let err = client
            .get_page("https://example.com/denied")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied { .. }));

        let stats = client.stats().finish_batch();
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.successful_requests, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        // The mock's routes are sticky, so model a flaky host by routing one
        // URL to an error and checking the retry count instead.
        let fetcher = MockPageFetcher::always_failing("connection reset");
        let client = PageClient::new(fetcher.clone(), unthrottled()).with_retry(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            backoff_base: 2.0,
            max_delay: Duration::from_millis(5),
        });

        let err = client.get_page("https://example.com/flaky").await.unwrap_err();
        assert!(matches!(err, AppError::NetworkError(_)));
        // Initial attempt plus two retries, all through the same fetcher.
        assert_eq!(fetcher.request_count(), 3);
        // One logical page request failed, regardless of retry attempts.
        assert_eq!(client.stats().finish_batch().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_captcha_page_is_counted_and_returned() {
        let challenge = r#"<div class="g-recaptcha" data-sitekey="k"></div>"#;
        let fetcher = MockPageFetcher::with_page(challenge);
        let client = PageClient::new(fetcher, unthrottled());

        let body = client.get_page("https://example.com/jobs").await.unwrap();
        assert!(body.contains("g-recaptcha"));

        let stats = client.stats().finish_batch();
        assert_eq!(stats.captchas_encountered, 1);
        assert_eq!(stats.captchas_solved, 0);
    }

    #[tokio::test]
    async fn test_no_cache_means_no_cache_counters() {
        let fetcher = MockPageFetcher::with_page("<html>ok</html>");
        let client = PageClient::new(fetcher, unthrottled());

        client.get_page("https://example.com/a").await.unwrap();
        let stats = client.stats().finish_batch();
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 0);
    }
}
