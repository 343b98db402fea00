//! Structured-API connectors for boards that publish their postings as
//! JSON. These share the fetch pipeline with the HTML scrapers (rate
//! limiting, caching, retry) but skip selector extraction entirely: the
//! response bodies map straight onto [`Posting`]s.
//!
//! The mapping functions are pure so they can be tested on fixture bodies
//! without any I/O.

use chrono::{DateTime, Utc};
use harvest_core::error::AppError;
use harvest_core::posting::{Posting, RawPosting, SearchParams};
use harvest_core::traits::PageFetcher;
use serde::{Deserialize, Serialize};

use crate::clean::DescriptionCleaner;
use crate::client::PageClient;

/// Keep postings whose title mentions any search term. An empty term list
/// keeps everything.
fn filter_by_terms(postings: Vec<Posting>, terms: &[String]) -> Vec<Posting> {
    if terms.is_empty() {
        return postings;
    }
    let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
    postings
        .into_iter()
        .filter(|p| {
            let title = p.title.to_lowercase();
            terms.iter().any(|t| title.contains(t))
        })
        .collect()
}

/// Greenhouse ships entity-escaped HTML in `content`. `&amp;` goes last so
/// `&amp;lt;` does not turn into a tag.
fn unescape_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn clean_description(cleaner: &DescriptionCleaner, html: &str) -> Option<String> {
    let html = if html.contains("&lt;") {
        unescape_entities(html)
    } else {
        html.to_string()
    };
    let cleaned = cleaner.clean(&html).ok()?;
    (!cleaned.is_empty()).then_some(cleaned)
}

// ---------------------------------------------------------------------------
// Greenhouse

#[derive(Debug, Deserialize)]
struct GreenhouseResponse {
    jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GreenhouseJob {
    absolute_url: String,
    title: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    location: Option<GreenhouseLocation>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GreenhouseLocation {
    name: String,
}

/// Map a Greenhouse board response. `board` doubles as the company name
/// when the job carries none.
pub fn map_greenhouse(board: &str, body: &str) -> Result<Vec<Posting>, AppError> {
    let response: GreenhouseResponse = serde_json::from_str(body)?;
    let cleaner = DescriptionCleaner::new();
    Ok(response
        .jobs
        .into_iter()
        .filter_map(|job| {
            let raw = RawPosting {
                source: "greenhouse".to_string(),
                company: job
                    .company_name
                    .clone()
                    .unwrap_or_else(|| board.to_string()),
                title: job.title.clone(),
                location: job
                    .location
                    .as_ref()
                    .map(|l| l.name.clone())
                    .unwrap_or_default(),
                salary: None,
                url: job.absolute_url.clone(),
                date_posted: job
                    .updated_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                description: job
                    .content
                    .as_deref()
                    .and_then(|c| clean_description(&cleaner, c)),
                payload: serde_json::to_value(&job).unwrap_or_default(),
            };
            raw.into_posting()
        })
        .collect())
}

pub struct GreenhouseConnector<F: PageFetcher> {
    board: String,
    client: PageClient<F>,
}

impl<F: PageFetcher> GreenhouseConnector<F> {
    pub fn new(board: impl Into<String>, client: PageClient<F>) -> Self {
        Self {
            board: board.into(),
            client,
        }
    }

    pub fn id(&self) -> String {
        format!("greenhouse:{}", self.board)
    }

    pub async fn fetch(&self, params: &SearchParams) -> Result<Vec<Posting>, AppError> {
        let url = format!(
            "https://boards-api.greenhouse.io/v1/boards/{}/jobs?content=true",
            self.board
        );
        let body = self.client.get_page(&url).await?;
        Ok(filter_by_terms(map_greenhouse(&self.board, &body)?, &params.terms))
    }
}

// ---------------------------------------------------------------------------
// Lever

#[derive(Debug, Serialize, Deserialize)]
struct LeverPosting {
    text: String,
    #[serde(rename = "hostedUrl")]
    hosted_url: String,
    #[serde(default)]
    categories: Option<LeverCategories>,
    #[serde(rename = "createdAt", default)]
    created_at: Option<i64>,
    #[serde(rename = "descriptionPlain", default)]
    description_plain: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LeverCategories {
    #[serde(default)]
    location: Option<String>,
}

/// Map a Lever postings response. The org slug stands in for the company.
pub fn map_lever(org: &str, body: &str) -> Result<Vec<Posting>, AppError> {
    let postings: Vec<LeverPosting> = serde_json::from_str(body)?;
    Ok(postings
        .into_iter()
        .filter_map(|job| {
            let raw = RawPosting {
                source: "lever".to_string(),
                company: org.to_string(),
                title: job.text.clone(),
                location: job
                    .categories
                    .as_ref()
                    .and_then(|c| c.location.clone())
                    .unwrap_or_default(),
                salary: None,
                url: job.hosted_url.clone(),
                date_posted: job.created_at.and_then(DateTime::from_timestamp_millis),
                description: job
                    .description_plain
                    .as_ref()
                    .filter(|d| !d.trim().is_empty())
                    .map(|d| d.trim().to_string()),
                payload: serde_json::to_value(&job).unwrap_or_default(),
            };
            raw.into_posting()
        })
        .collect())
}

pub struct LeverConnector<F: PageFetcher> {
    org: String,
    client: PageClient<F>,
}

impl<F: PageFetcher> LeverConnector<F> {
    pub fn new(org: impl Into<String>, client: PageClient<F>) -> Self {
        Self {
            org: org.into(),
            client,
        }
    }

    pub fn id(&self) -> String {
        format!("lever:{}", self.org)
    }

    pub async fn fetch(&self, params: &SearchParams) -> Result<Vec<Posting>, AppError> {
        let url = format!("https://api.lever.co/v0/postings/{}?mode=json", self.org);
        let body = self.client.get_page(&url).await?;
        Ok(filter_by_terms(map_lever(&self.org, &body)?, &params.terms))
    }
}

// ---------------------------------------------------------------------------
// RemoteOK

#[derive(Debug, Serialize, Deserialize)]
struct RemoteOkJob {
    position: String,
    company: String,
    url: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    salary_min: Option<u64>,
    #[serde(default)]
    salary_max: Option<u64>,
    #[serde(default)]
    description: Option<String>,
}

/// Map the RemoteOK feed. The first element is a legal notice, not a job;
/// anything without a `position` field is skipped the same way.
pub fn map_remoteok(body: &str) -> Result<Vec<Posting>, AppError> {
    let items: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let cleaner = DescriptionCleaner::new();
    Ok(items
        .into_iter()
        .filter(|item| item.get("position").is_some())
        .filter_map(|item| {
            let job: RemoteOkJob = serde_json::from_value(item.clone()).ok()?;
            let salary = match (job.salary_min, job.salary_max) {
                (Some(min), Some(max)) if min > 0 && max > 0 => Some(format!("${min} - ${max}")),
                _ => None,
            };
            let raw = RawPosting {
                source: "remoteok".to_string(),
                company: job.company.clone(),
                title: job.position.clone(),
                location: job
                    .location
                    .clone()
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| "Remote".to_string()),
                salary,
                url: job.url.clone(),
                date_posted: job
                    .date
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                description: job
                    .description
                    .as_deref()
                    .and_then(|d| clean_description(&cleaner, d)),
                payload: item,
            };
            raw.into_posting()
        })
        .collect())
}

pub struct RemoteOkConnector<F: PageFetcher> {
    client: PageClient<F>,
}

impl<F: PageFetcher> RemoteOkConnector<F> {
    pub fn new(client: PageClient<F>) -> Self {
        Self { client }
    }

    pub fn id(&self) -> String {
        "remoteok".to_string()
    }

    pub async fn fetch(&self, params: &SearchParams) -> Result<Vec<Posting>, AppError> {
        let body = self.client.get_page("https://remoteok.com/api").await?;
        Ok(filter_by_terms(map_remoteok(&body)?, &params.terms))
    }
}

// ---------------------------------------------------------------------------

/// The closed set of API connectors the engine knows how to build.
pub enum ApiConnector<F: PageFetcher> {
    Greenhouse(GreenhouseConnector<F>),
    Lever(LeverConnector<F>),
    RemoteOk(RemoteOkConnector<F>),
}

impl<F: PageFetcher> ApiConnector<F> {
    pub fn id(&self) -> String {
        match self {
            ApiConnector::Greenhouse(c) => c.id(),
            ApiConnector::Lever(c) => c.id(),
            ApiConnector::RemoteOk(c) => c.id(),
        }
    }

    pub async fn fetch(&self, params: &SearchParams) -> Result<Vec<Posting>, AppError> {
        match self {
            ApiConnector::Greenhouse(c) => c.fetch(params).await,
            ApiConnector::Lever(c) => c.fetch(params).await,
            ApiConnector::RemoteOk(c) => c.fetch(params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use harvest_core::ratelimit::{HostRateLimiter, RateLimitConfig};
    use harvest_core::testutil::MockPageFetcher;

    use super::*;

    const GREENHOUSE_BODY: &str = r#"{
        "jobs": [
            {
                "absolute_url": "https://boards.greenhouse.io/acme/jobs/1",
                "title": "Senior Rust Engineer",
                "location": {"name": "Berlin, Germany"},
                "updated_at": "2026-08-20T12:00:00-04:00",
                "content": "&lt;p&gt;Build scrapers in &lt;b&gt;Rust&lt;/b&gt;.&lt;/p&gt;"
            },
            {
                "absolute_url": "https://boards.greenhouse.io/acme/jobs/2",
                "title": "Office Manager",
                "location": {"name": "New York, NY"}
            }
        ]
    }"#;

    const LEVER_BODY: &str = r#"[
        {
            "text": "Rust Platform Engineer",
            "hostedUrl": "https://jobs.lever.co/initech/1",
            "categories": {"location": "Remote"},
            "createdAt": 1755600000000,
            "descriptionPlain": "Own the ingestion pipeline."
        }
    ]"#;

    const REMOTEOK_BODY: &str = r#"[
        {"legal": "API terms of service apply."},
        {
            "position": "Rust Engineer",
            "company": "Globex",
            "url": "https://remoteok.com/remote-jobs/100",
            "location": "",
            "date": "2026-08-25T00:00:00+00:00",
            "salary_min": 90000,
            "salary_max": 120000,
            "description": "<p>Fully remote role.</p>"
        }
    ]"#;

    #[test]
    fn test_greenhouse_mapping_and_escaped_content() {
        let postings = map_greenhouse("acme", GREENHOUSE_BODY).unwrap();
        assert_eq!(postings.len(), 2);

        let rust = &postings[0];
        assert_eq!(rust.source, "greenhouse");
        assert_eq!(rust.company, "acme");
        assert_eq!(rust.title, "Senior Rust Engineer");
        assert_eq!(rust.location, "Berlin, Germany");
        let description = rust.description.as_deref().unwrap();
        assert!(description.contains("Build scrapers"));
        assert!(!description.contains("&lt;"));
        assert!(!description.contains("<p>"));

        // Missing optional fields degrade, they do not drop the posting.
        assert!(postings[1].description.is_none());
    }

    #[test]
    fn test_lever_mapping() {
        let postings = map_lever("initech", LEVER_BODY).unwrap();
        assert_eq!(postings.len(), 1);
        let p = &postings[0];
        assert_eq!(p.source, "lever");
        assert_eq!(p.company, "initech");
        assert_eq!(p.location, "Remote");
        assert_eq!(p.description.as_deref(), Some("Own the ingestion pipeline."));
        assert_eq!(p.date_posted.timestamp_millis(), 1755600000000);
    }

    #[test]
    fn test_remoteok_skips_legal_notice_and_formats_salary() {
        let postings = map_remoteok(REMOTEOK_BODY).unwrap();
        assert_eq!(postings.len(), 1);
        let p = &postings[0];
        assert_eq!(p.company, "Globex");
        assert_eq!(p.location, "Remote");
        assert_eq!(p.salary.as_deref(), Some("$90000 - $120000"));
    }

    #[test]
    fn test_malformed_body_is_a_parse_error() {
        assert!(map_lever("initech", "<html>rate limited</html>").is_err());
        assert!(map_greenhouse("acme", "{}").is_err());
    }

    #[test]
    fn test_term_filtering_on_titles() {
        let postings = map_greenhouse("acme", GREENHOUSE_BODY).unwrap();
        let filtered = filter_by_terms(postings.clone(), &["rust".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].title, "Senior Rust Engineer");

        // No terms means no filtering.
        assert_eq!(filter_by_terms(postings, &[]).len(), 2);
    }

    #[tokio::test]
    async fn test_connector_fetch_goes_through_client() {
        let fetcher = MockPageFetcher::with_page(GREENHOUSE_BODY);
        let limiter = HostRateLimiter::new(RateLimitConfig::from_requests_per_minute(60_000));
        let connector =
            GreenhouseConnector::new("acme", PageClient::new(fetcher.clone(), limiter));

        let params = SearchParams::new(vec!["rust".to_string()]);
        let postings = connector.fetch(&params).await.unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(connector.id(), "greenhouse:acme");
        assert_eq!(fetcher.request_count(), 1);
    }
}
