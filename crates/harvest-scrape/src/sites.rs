//! Site-specific scrapers over a closed registry of supported job boards.
//!
//! Each supported board ships a [`SiteSpec`]: its search URL builder, card
//! and link candidates, and the default field selectors the maintainer is
//! seeded with. [`SiteScraper`] drives the shared pipeline; fetch through
//! [`PageClient`], locate result cards, extract fields through the selector
//! maintainer, and fold the batch into a [`SourceReport`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use harvest_core::error::AppError;
use harvest_core::posting::{Posting, RawPosting, SearchParams, dedup_by_url, parse_posted_date};
use harvest_core::stats::ScrapeStats;
use harvest_core::traits::PageFetcher;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::clean::DescriptionCleaner;
use crate::client::PageClient;
use crate::selectors::health::SelectorHealthChecker;
use crate::selectors::{Purpose, SelectorMaintainer, first_match_text};

/// How often a scraper re-verifies its selectors against a live search.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Everything board-specific: URL shape and selector candidates. The first
/// candidate of each field list seeds the maintainer's primary selector,
/// the rest become its fallback chain.
pub struct SiteSpec {
    pub id: &'static str,
    pub base_url: &'static str,
    pub search_url: fn(&SearchParams, &str) -> String,
    pub card_selectors: &'static [&'static str],
    pub link_selectors: &'static [&'static str],
    pub field_selectors: &'static [(Purpose, &'static [&'static str])],
}

fn select_inner_html(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel).next().map(|el| el.inner_html())
}

fn build_url(base: &str, query: &[(&str, String)]) -> String {
    match Url::parse_with_params(base, query.iter().map(|(k, v)| (*k, v.as_str()))) {
        Ok(url) => url.to_string(),
        Err(_) => base.to_string(),
    }
}

fn indeed_search_url(params: &SearchParams, term: &str) -> String {
    let mut query = vec![("q", term.to_string())];
    if let Some(location) = &params.location {
        query.push(("l", location.clone()));
    }
    if params.remote_only {
        query.push(("sc", "0kf:attr(DSQF7);".to_string()));
    }
    build_url("https://www.indeed.com/jobs", &query)
}

fn linkedin_search_url(params: &SearchParams, term: &str) -> String {
    let mut query = vec![("keywords", term.to_string())];
    if let Some(location) = &params.location {
        query.push(("location", location.clone()));
    }
    if params.remote_only {
        query.push(("f_WT", "2".to_string()));
    }
    build_url("https://www.linkedin.com/jobs/search/", &query)
}

fn ziprecruiter_search_url(params: &SearchParams, term: &str) -> String {
    let mut query = vec![("search", term.to_string())];
    if let Some(location) = &params.location {
        query.push(("location", location.clone()));
    }
    if params.remote_only {
        query.push(("refine_by_location_type", "only_remote".to_string()));
    }
    build_url("https://www.ziprecruiter.com/jobs-search", &query)
}

pub static INDEED: SiteSpec = SiteSpec {
    id: "indeed",
    base_url: "https://www.indeed.com",
    search_url: indeed_search_url,
    card_selectors: &[
        "div.job_seen_beacon",
        "div.jobsearch-SerpJobCard",
        "td.resultContent",
    ],
    link_selectors: &["h2.jobTitle a", "a.jcs-JobTitle", r#"a[id^="job_"]"#],
    field_selectors: &[
        (
            Purpose::CardTitle,
            &[r#"h2.jobTitle span[title]"#, "h2.jobTitle", "a.jcs-JobTitle"],
        ),
        (
            Purpose::CardCompany,
            &["span.companyName", r#"span[data-testid="company-name"]"#],
        ),
        (
            Purpose::CardLocation,
            &["div.companyLocation", r#"div[data-testid="text-location"]"#],
        ),
        (
            Purpose::CardSalary,
            &[
                "div.metadata.salary-snippet-container",
                "div.salary-snippet",
                r#"div[class*="salary"]"#,
            ],
        ),
        (
            Purpose::CardDate,
            &["span.date", r#"span[data-testid="myJobsStateDate"]"#],
        ),
        (
            Purpose::Description,
            &["#jobDescriptionText", "div.jobsearch-jobDescriptionText"],
        ),
    ],
};

pub static LINKEDIN: SiteSpec = SiteSpec {
    id: "linkedin",
    base_url: "https://www.linkedin.com",
    search_url: linkedin_search_url,
    card_selectors: &[
        "div.base-search-card",
        "div.base-card",
        "div.job-search-card",
    ],
    link_selectors: &["a.base-card__full-link", "a.base-search-card__full-link"],
    field_selectors: &[
        (
            Purpose::CardTitle,
            &["h3.base-search-card__title", "h3.base-card__title"],
        ),
        (
            Purpose::CardCompany,
            &["h4.base-search-card__subtitle", "a.hidden-nested-link"],
        ),
        (Purpose::CardLocation, &["span.job-search-card__location"]),
        (Purpose::CardSalary, &["span.job-search-card__salary-info"]),
        (
            Purpose::CardDate,
            &["time.job-search-card__listdate", "time"],
        ),
        (
            Purpose::Description,
            &["div.show-more-less-html__markup", "div.description__text"],
        ),
    ],
};

pub static ZIPRECRUITER: SiteSpec = SiteSpec {
    id: "ziprecruiter",
    base_url: "https://www.ziprecruiter.com",
    search_url: ziprecruiter_search_url,
    card_selectors: &["article.job_result", "div.job_content", "li.job-listing"],
    link_selectors: &["a.job_link", "h2.title a"],
    field_selectors: &[
        (Purpose::CardTitle, &["h2.title", "a.job_link"]),
        (
            Purpose::CardCompany,
            &[
                "a.company_name",
                "span.company_name",
                r#"[data-testid="job-card-company"]"#,
            ],
        ),
        (
            Purpose::CardLocation,
            &[
                "span.location",
                "p.company_location",
                r#"[data-testid="job-card-location"]"#,
            ],
        ),
        (Purpose::CardSalary, &["span.salary", "div.perks_item"]),
        (Purpose::CardDate, &["span.posted_time", "time"]),
        (
            Purpose::Description,
            &["div.job_description", "div.jobDescriptionSection"],
        ),
    ],
};

/// The closed set of scraped boards. Adding a board means adding a spec
/// here, not registering one at runtime.
pub static SITES: &[&SiteSpec] = &[&INDEED, &LINKEDIN, &ZIPRECRUITER];

pub fn site_by_id(id: &str) -> Option<&'static SiteSpec> {
    SITES.iter().copied().find(|s| s.id == id)
}

/// Outcome of one scraping batch against one source.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub postings: Vec<Posting>,
    pub stats: ScrapeStats,
    pub errors: Vec<String>,
}

/// One board's scraper: a [`SiteSpec`] bound to a fetch pipeline and the
/// shared selector state.
pub struct SiteScraper<F: PageFetcher> {
    spec: &'static SiteSpec,
    client: PageClient<F>,
    selectors: Arc<SelectorMaintainer>,
    health: Arc<SelectorHealthChecker>,
    cleaner: DescriptionCleaner,
    fetch_details: bool,
    term_concurrency: usize,
    health_interval: Duration,
    // Starts at construction time, so a fresh engine does not spend its
    // first batch on a health check.
    last_health_check: Mutex<Instant>,
}

impl<F: PageFetcher> SiteScraper<F> {
    pub fn new(
        spec: &'static SiteSpec,
        client: PageClient<F>,
        selectors: Arc<SelectorMaintainer>,
        health: Arc<SelectorHealthChecker>,
    ) -> Self {
        selectors.ensure_defaults(spec.id, spec.field_selectors.iter().copied());
        Self {
            spec,
            client,
            selectors,
            health,
            cleaner: DescriptionCleaner::new(),
            fetch_details: false,
            term_concurrency: 2,
            health_interval: HEALTH_CHECK_INTERVAL,
            last_health_check: Mutex::new(Instant::now()),
        }
    }

    /// Follow each result card to its detail page for the full
    /// description. Off by default; roughly doubles the request count.
    pub fn with_details(mut self, enabled: bool) -> Self {
        self.fetch_details = enabled;
        self
    }

    pub fn with_term_concurrency(mut self, concurrency: usize) -> Self {
        self.term_concurrency = concurrency.max(1);
        self
    }

    #[cfg(test)]
    fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn id(&self) -> &'static str {
        self.spec.id
    }

    /// Search one term and extract postings from the result page.
    pub async fn search(&self, term: &str, params: &SearchParams) -> Result<Vec<Posting>, AppError> {
        let url = (self.spec.search_url)(params, term);
        let html = self.client.get_page(&url).await?;

        // Parsed documents are not Send; keep them out of scope before the
        // detail-fetch awaits below.
        let mut postings = Vec::new();
        {
            let doc = Html::parse_document(&html);
            let cards = self.find_cards(&doc);
            tracing::debug!(site = self.spec.id, term = %term, cards = cards.len(), "Parsed search page");

            for card in cards {
                if let Some(posting) = self.card_to_posting(card, &html) {
                    postings.push(posting);
                }
            }
        }

        // Boards repeat promoted cards within one page; collapse them here
        // so the detail fetch below never hits the same URL twice.
        let mut postings = dedup_by_url(postings);

        if self.fetch_details {
            for posting in &mut postings {
                match self.get_details(&posting.url).await {
                    Ok(description) => posting.description = description,
                    Err(e) => {
                        tracing::warn!(site = self.spec.id, url = %posting.url, error = %e, "Detail fetch failed");
                    }
                }
            }
        }
        Ok(postings)
    }

    /// Fetch and clean a posting's full description. Absence of the
    /// description block is a routine outcome.
    pub async fn get_details(&self, url: &str) -> Result<Option<String>, AppError> {
        let html = self.client.get_page(url).await?;
        let doc = Html::parse_document(&html);
        let Some(fragment) = self.description_html(&doc, &html) else {
            tracing::debug!(site = self.spec.id, url = %url, "No description block found");
            return Ok(None);
        };
        Ok(Some(self.cleaner.clean(&fragment)?))
    }

    /// Locate the description block and return its inner markup for the
    /// cleaner. Tracked like any other purpose, but extraction keeps the
    /// HTML instead of flattening to text.
    fn description_html(&self, doc: &Html, page_html: &str) -> Option<String> {
        let site = self.spec.id;
        if let Some(primary) = self.selectors.get_selector(site, Purpose::Description) {
            if let Some(fragment) = select_inner_html(doc, &primary) {
                self.selectors.report_success(site, Purpose::Description);
                return Some(fragment);
            }
            self.selectors.report_failure(site, Purpose::Description);
            if let Some(repaired) = self.selectors.repair(site, Purpose::Description, page_html, None)
                && let Some(fragment) = select_inner_html(doc, &repaired)
            {
                self.selectors.report_success(site, Purpose::Description);
                return Some(fragment);
            }
        }
        self.spec
            .field_selectors
            .iter()
            .find(|(p, _)| *p == Purpose::Description)
            .and_then(|(_, candidates)| {
                candidates
                    .iter()
                    .find_map(|candidate| select_inner_html(doc, candidate))
            })
    }

    /// Run a full batch: every term concurrently, per-term failures logged
    /// and folded into the report, results deduplicated by URL.
    pub async fn fetch_all_jobs(&self, params: &SearchParams) -> SourceReport {
        self.client.stats().start_batch();
        let mut errors = Vec::new();

        let results: Vec<(String, Result<Vec<Posting>, AppError>)> =
            stream::iter(params.terms.clone())
                .map(|term| async move {
                    let outcome = self.search(&term, params).await;
                    (term, outcome)
                })
                .buffer_unordered(self.term_concurrency)
                .collect()
                .await;

        let mut postings = Vec::new();
        for (term, outcome) in results {
            match outcome {
                Ok(mut found) => postings.append(&mut found),
                Err(e) => {
                    tracing::warn!(site = self.spec.id, term = %term, error = %e, "Search term failed");
                    errors.push(format!("{term}: {e}"));
                }
            }
        }

        let postings = dedup_by_url(postings);
        self.client.stats().record_jobs(postings.len() as u64);

        if self.health_check_due()
            && let Err(e) = self.run_health_check(params).await
        {
            tracing::warn!(site = self.spec.id, error = %e, "Selector health check failed");
        }

        SourceReport {
            source: self.spec.id.to_string(),
            postings,
            stats: self.client.stats().finish_batch(),
            errors,
        }
    }

    /// Verify every card purpose against a live search page and record the
    /// outcomes with the health checker.
    pub async fn run_health_check(&self, params: &SearchParams) -> Result<(), AppError> {
        let term = params
            .terms
            .first()
            .cloned()
            .unwrap_or_else(|| "software engineer".to_string());
        let url = (self.spec.search_url)(params, &term);
        let html = self.client.get_page(&url).await?;

        let purposes = [
            Purpose::CardTitle,
            Purpose::CardCompany,
            Purpose::CardLocation,
            Purpose::CardSalary,
            Purpose::CardDate,
        ];

        let detail_url = {
            let doc = Html::parse_document(&html);
            let Some(card) = self.find_cards(&doc).into_iter().next() else {
                tracing::warn!(site = self.spec.id, "Health check found no result cards");
                for purpose in purposes {
                    self.health.record(self.spec.id, purpose, false);
                }
                return Ok(());
            };

            for purpose in purposes {
                let ok = self.extract_field(card, purpose, &html).is_some();
                self.health.record(self.spec.id, purpose, ok);
                if !ok && purpose.required() {
                    tracing::warn!(
                        site = self.spec.id,
                        purpose = purpose.as_str(),
                        "Required selector failed health check"
                    );
                }
            }
            self.card_link(card)
        };

        // The description selector only lives on detail pages; verify it
        // there when a job link is available.
        if let Some(detail_url) = detail_url {
            let ok = match self.get_details(&detail_url).await {
                Ok(description) => description.is_some(),
                Err(_) => false,
            };
            self.health.record(self.spec.id, Purpose::Description, ok);
        }

        *self.last_health_check.lock().unwrap() = Instant::now();
        Ok(())
    }

    fn health_check_due(&self) -> bool {
        self.last_health_check.lock().unwrap().elapsed() >= self.health_interval
    }

    fn find_cards<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        for candidate in self.spec.card_selectors {
            let Ok(sel) = Selector::parse(candidate) else {
                continue;
            };
            let cards: Vec<ElementRef<'a>> = doc.select(&sel).collect();
            if !cards.is_empty() {
                return cards;
            }
        }
        Vec::new()
    }

    fn card_to_posting(&self, card: ElementRef<'_>, page_html: &str) -> Option<Posting> {
        let Some(url) = self.card_link(card) else {
            tracing::warn!(site = self.spec.id, "Skipping card without a job link");
            return None;
        };

        let title = self.extract_field(card, Purpose::CardTitle, page_html);
        let company = self.extract_field(card, Purpose::CardCompany, page_html);
        let location = self.extract_field(card, Purpose::CardLocation, page_html);
        let (Some(title), Some(company), Some(location)) = (title, company, location) else {
            tracing::warn!(site = self.spec.id, url = %url, "Skipping card with missing required fields");
            return None;
        };

        let salary = self.extract_field(card, Purpose::CardSalary, page_html);
        let date_text = self.extract_field(card, Purpose::CardDate, page_html);
        let date_posted = date_text
            .as_deref()
            .map(|text| parse_posted_date(text, chrono::Utc::now()));

        let raw = RawPosting {
            source: self.spec.id.to_string(),
            company,
            title,
            location,
            salary,
            url,
            date_posted,
            description: None,
            payload: serde_json::json!({ "date_text": date_text }),
        };
        raw.into_posting()
    }

    fn card_link(&self, card: ElementRef<'_>) -> Option<String> {
        for candidate in self.spec.link_selectors {
            let Ok(sel) = Selector::parse(candidate) else {
                continue;
            };
            if let Some(href) = card.select(&sel).find_map(|el| el.value().attr("href")) {
                return self.resolve_href(href);
            }
        }
        // Some boards make the card itself the anchor.
        if card.value().name() == "a"
            && let Some(href) = card.value().attr("href")
        {
            return self.resolve_href(href);
        }
        None
    }

    fn resolve_href(&self, href: &str) -> Option<String> {
        Url::parse(self.spec.base_url)
            .ok()?
            .join(href)
            .ok()
            .map(|u| u.to_string())
    }

    /// Maintainer-tracked extraction, with the shipped candidates as an
    /// untracked last resort.
    fn extract_field(
        &self,
        scope: ElementRef<'_>,
        purpose: Purpose,
        page_html: &str,
    ) -> Option<String> {
        if let Some(text) = self
            .selectors
            .extract(self.spec.id, purpose, scope, page_html, None)
        {
            return Some(text);
        }
        self.spec
            .field_selectors
            .iter()
            .find(|(p, _)| *p == purpose)
            .and_then(|(_, candidates)| {
                candidates
                    .iter()
                    .find_map(|candidate| first_match_text(scope, candidate))
            })
    }
}
