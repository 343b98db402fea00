//! Fans a search out over every configured site scraper with bounded
//! concurrency. Scraper failures never cross source boundaries: each
//! scraper folds its own errors into its [`SourceReport`].

use futures::StreamExt;
use futures::stream;
use harvest_core::posting::SearchParams;
use harvest_core::traits::PageFetcher;

use crate::sites::{SiteScraper, SourceReport};

pub struct ScraperOrchestrator<F: PageFetcher> {
    scrapers: Vec<SiteScraper<F>>,
    concurrency: usize,
}

impl<F: PageFetcher> ScraperOrchestrator<F> {
    pub fn new(scrapers: Vec<SiteScraper<F>>) -> Self {
        Self {
            scrapers,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn scrapers(&self) -> &[SiteScraper<F>] {
        &self.scrapers
    }

    /// Run one batch on every scraper. Reports come back sorted by source
    /// id so output is stable regardless of completion order.
    pub async fn run(&self, params: &SearchParams) -> Vec<SourceReport> {
        let mut reports: Vec<SourceReport> = stream::iter(self.scrapers.iter())
            .map(|scraper| async move {
                tracing::info!(site = scraper.id(), "Starting scrape batch");
                let report = scraper.fetch_all_jobs(params).await;
                tracing::info!(
                    site = scraper.id(),
                    jobs = report.postings.len(),
                    errors = report.errors.len(),
                    "Scrape batch finished"
                );
                report
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        reports.sort_by(|a, b| a.source.cmp(&b.source));
        reports
    }

    /// Force a selector health pass on every scraper, regardless of the
    /// per-scraper schedule.
    pub async fn run_health_checks(&self, params: &SearchParams) {
        for scraper in &self.scrapers {
            if let Err(e) = scraper.run_health_check(params).await {
                tracing::warn!(site = scraper.id(), error = %e, "Health check failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use harvest_core::ratelimit::{HostRateLimiter, RateLimitConfig};
    use harvest_core::retry::RetryPolicy;
    use harvest_core::testutil::MockPageFetcher;

    use super::*;
    use crate::client::PageClient;
    use crate::selectors::SelectorMaintainer;
    use crate::selectors::health::SelectorHealthChecker;
    use crate::sites::{INDEED, LINKEDIN, SiteSpec};

    const INDEED_PAGE: &str = r#"<html><body>
        <div class="job_seen_beacon">
          <h2 class="jobTitle"><a href="/viewjob?jk=1"><span title="Senior Rust Engineer">Senior Rust Engineer</span></a></h2>
          <span class="companyName">Acme Corp</span>
          <div class="companyLocation">Berlin, Germany</div>
        </div>
    </body></html>"#;

    const LINKEDIN_PAGE: &str = r#"<html><body>
        <div class="base-search-card">
          <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/123">link</a>
          <h3 class="base-search-card__title">Rust Backend Engineer</h3>
          <h4 class="base-search-card__subtitle">Initech GmbH</h4>
          <span class="job-search-card__location">Remote</span>
        </div>
    </body></html>"#;

    fn scraper_for(spec: &'static SiteSpec, page: &str) -> SiteScraper<MockPageFetcher> {
        let limiter = HostRateLimiter::new(RateLimitConfig::from_requests_per_minute(60_000));
        let client = PageClient::new(MockPageFetcher::with_page(page), limiter)
            .with_retry(RetryPolicy::new(0, std::time::Duration::ZERO));
        SiteScraper::new(
            spec,
            client,
            Arc::new(SelectorMaintainer::in_memory()),
            Arc::new(SelectorHealthChecker::new()),
        )
    }

    #[tokio::test]
    async fn test_run_collects_sorted_reports_from_all_scrapers() {
        let orchestrator = ScraperOrchestrator::new(vec![
            scraper_for(&LINKEDIN, LINKEDIN_PAGE),
            scraper_for(&INDEED, INDEED_PAGE),
        ])
        .with_concurrency(2);

        let params = SearchParams::new(vec!["rust".to_string()]);
        let reports = orchestrator.run(&params).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source, "indeed");
        assert_eq!(reports[1].source, "linkedin");
        assert_eq!(reports[0].postings.len(), 1);
        assert_eq!(reports[1].postings.len(), 1);
        assert_eq!(reports[1].postings[0].company, "Initech GmbH");
    }

    #[tokio::test]
    async fn test_one_failing_scraper_does_not_poison_others() {
        let orchestrator = ScraperOrchestrator::new(vec![
            scraper_for(&INDEED, INDEED_PAGE),
            SiteScraper::new(
                &LINKEDIN,
                PageClient::new(
                    MockPageFetcher::always_failing("connection reset"),
                    HostRateLimiter::new(RateLimitConfig::from_requests_per_minute(60_000)),
                )
                .with_retry(RetryPolicy::new(0, std::time::Duration::ZERO)),
                Arc::new(SelectorMaintainer::in_memory()),
                Arc::new(SelectorHealthChecker::new()),
            ),
        ]);

        let params = SearchParams::new(vec!["rust".to_string()]);
        let reports = orchestrator.run(&params).await;

        let indeed = reports.iter().find(|r| r.source == "indeed").unwrap();
        assert_eq!(indeed.postings.len(), 1);

        let linkedin = reports.iter().find(|r| r.source == "linkedin").unwrap();
        assert!(linkedin.postings.is_empty());
        assert!(!linkedin.errors.is_empty());
    }
}
