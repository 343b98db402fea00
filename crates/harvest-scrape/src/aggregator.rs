//! Top-level aggregation: HTML scrapers and API connectors queried side by
//! side, results deduplicated across sources and enriched before they leave
//! the engine. One misbehaving source never takes the batch down; the only
//! fatal error class is misconfiguration, raised by [`build_aggregator`]
//! before any request is made.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use harvest_core::cache::{CacheConfig, ResponseCache};
use harvest_core::config::{EngineConfig, SourceConfig};
use harvest_core::error::AppError;
use harvest_core::posting::{Posting, SearchParams, dedup_cross_source};
use harvest_core::ratelimit::{HostRateLimiter, RateLimitConfig};
use harvest_core::stats::ScrapeStats;
use harvest_core::traits::PageFetcher;
use serde::Serialize;

use crate::captcha::{CaptchaHandler, RemoteSolver};
use crate::client::{PageClient, ReqwestPageFetcher};
use crate::connectors::{
    ApiConnector, GreenhouseConnector, LeverConnector, RemoteOkConnector,
};
use crate::orchestrator::ScraperOrchestrator;
use crate::profile::BrowserProfile;
use crate::selectors::SelectorMaintainer;
use crate::selectors::health::{HealthReportEntry, SelectorHealthChecker};
use crate::sites::{SITES, SiteScraper};

/// Identifiers the configuration may reference.
pub fn known_source_ids() -> Vec<&'static str> {
    SITES
        .iter()
        .map(|s| s.id)
        .chain(["greenhouse", "lever", "remoteok"])
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub stats: ScrapeStats,
}

/// Outcome of one aggregated batch across every configured source.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub postings: Vec<Posting>,
    pub sources_queried: usize,
    pub sources_succeeded: usize,
    pub sources_failed: usize,
    pub errors: Vec<SourceError>,
    pub stats: Vec<SourceStats>,
}

pub struct JobAggregatorService<F: PageFetcher> {
    orchestrator: ScraperOrchestrator<F>,
    connectors: Vec<ApiConnector<F>>,
    concurrency: usize,
    health: Arc<SelectorHealthChecker>,
}

impl<F: PageFetcher> JobAggregatorService<F> {
    pub fn new(
        orchestrator: ScraperOrchestrator<F>,
        connectors: Vec<ApiConnector<F>>,
        health: Arc<SelectorHealthChecker>,
    ) -> Self {
        Self {
            orchestrator,
            connectors,
            concurrency: 4,
            health,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn scraper_count(&self) -> usize {
        self.orchestrator.scrapers().len()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Run everything, fold the outcomes, deduplicate across sources and
    /// enrich the survivors.
    pub async fn aggregate(&self, params: &SearchParams) -> AggregateReport {
        let (reports, api_outcomes) = tokio::join!(
            self.orchestrator.run(params),
            stream::iter(self.connectors.iter())
                .map(|connector| async move {
                    tracing::info!(source = %connector.id(), "Querying API source");
                    (connector.id(), connector.fetch(params).await)
                })
                .buffer_unordered(self.concurrency)
                .collect::<Vec<_>>(),
        );

        let sources_queried = reports.len() + api_outcomes.len();
        let mut sources_failed = 0;
        let mut errors = Vec::new();
        let mut stats = Vec::new();
        let mut postings = Vec::new();

        for report in reports {
            // A scrape counts as failed only when it produced nothing but
            // errors; partial results still count.
            if report.postings.is_empty() && !report.errors.is_empty() {
                sources_failed += 1;
            }
            for message in report.errors {
                errors.push(SourceError {
                    source: report.source.clone(),
                    message,
                });
            }
            stats.push(SourceStats {
                source: report.source,
                stats: report.stats,
            });
            postings.extend(report.postings);
        }

        for (source, outcome) in api_outcomes {
            match outcome {
                Ok(found) => {
                    tracing::info!(source = %source, jobs = found.len(), "API source finished");
                    postings.extend(found);
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "API source failed");
                    sources_failed += 1;
                    errors.push(SourceError {
                        source,
                        message: e.to_string(),
                    });
                }
            }
        }

        let now = Utc::now();
        let postings: Vec<Posting> = dedup_cross_source(postings)
            .into_iter()
            .map(|p| p.with_metadata(now))
            .collect();

        tracing::info!(
            jobs = postings.len(),
            queried = sources_queried,
            failed = sources_failed,
            "Aggregation finished"
        );

        AggregateReport {
            postings,
            sources_queried,
            sources_succeeded: sources_queried - sources_failed,
            sources_failed,
            errors,
            stats,
        }
    }

    /// Force a selector health pass on every scraper and return the
    /// accumulated records.
    pub async fn run_health_checks(&self, params: &SearchParams) -> Vec<HealthReportEntry> {
        self.orchestrator.run_health_checks(params).await;
        self.health.report()
    }

    pub fn health_report(&self) -> Vec<HealthReportEntry> {
        self.health.report()
    }
}

fn build_client(
    config: &EngineConfig,
    source: &SourceConfig,
    id: &str,
) -> Result<PageClient<ReqwestPageFetcher>, AppError> {
    let fetcher = ReqwestPageFetcher::new(
        Duration::from_secs(config.timeout_secs),
        source.proxy.as_deref(),
    )?;
    let limiter = HostRateLimiter::new(
        RateLimitConfig::from_requests_per_minute(source.requests_per_minute)
            .with_jitter(Duration::from_millis(400)),
    );
    let mut client = PageClient::new(fetcher, limiter);

    if source.cache_enabled {
        let cache_config = CacheConfig::new(config.cache_dir.join(id))
            .with_max_age(Duration::from_secs(source.cache_max_age_secs));
        client = client.with_cache(ResponseCache::new(cache_config)?);
    }
    if source.browser_simulation {
        client = client
            .with_profile(BrowserProfile::new().with_user_agents(config.user_agents.clone()));
    }
    if let (Some(url), Some(key)) = (&source.captcha_service_url, &source.captcha_api_key) {
        client = client.with_captcha(CaptchaHandler::with_solver(Arc::new(RemoteSolver::new(
            url.as_str(),
            key.as_str(),
        ))));
    }
    Ok(client)
}

/// Construct the full engine from configuration. HTML scrapers are on by
/// default; API connectors run only when their source is configured.
pub fn build_aggregator(
    config: &EngineConfig,
) -> Result<JobAggregatorService<ReqwestPageFetcher>, AppError> {
    config.validate(&known_source_ids())?;

    let selectors = Arc::new(SelectorMaintainer::load(&config.selector_file));
    let health = Arc::new(SelectorHealthChecker::new());

    let mut scrapers = Vec::new();
    for spec in SITES {
        let source = config.source(spec.id);
        if !source.enabled {
            tracing::info!(site = spec.id, "Source disabled by configuration");
            continue;
        }
        scrapers.push(
            SiteScraper::new(
                spec,
                build_client(config, &source, spec.id)?,
                Arc::clone(&selectors),
                Arc::clone(&health),
            )
            .with_details(source.fetch_descriptions),
        );
    }

    let mut connectors = Vec::new();
    if let Some(source) = config.sources.get("greenhouse")
        && source.enabled
    {
        if source.boards.is_empty() {
            tracing::warn!("greenhouse is enabled but lists no boards");
        }
        for board in &source.boards {
            connectors.push(ApiConnector::Greenhouse(GreenhouseConnector::new(
                board.clone(),
                build_client(config, source, "greenhouse")?,
            )));
        }
    }
    if let Some(source) = config.sources.get("lever")
        && source.enabled
    {
        if source.boards.is_empty() {
            tracing::warn!("lever is enabled but lists no orgs");
        }
        for org in &source.boards {
            connectors.push(ApiConnector::Lever(LeverConnector::new(
                org.clone(),
                build_client(config, source, "lever")?,
            )));
        }
    }
    if let Some(source) = config.sources.get("remoteok")
        && source.enabled
    {
        connectors.push(ApiConnector::RemoteOk(RemoteOkConnector::new(
            build_client(config, source, "remoteok")?,
        )));
    }

    let orchestrator =
        ScraperOrchestrator::new(scrapers).with_concurrency(config.concurrency);
    Ok(JobAggregatorService::new(orchestrator, connectors, health)
        .with_concurrency(config.concurrency))
}
