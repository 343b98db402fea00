use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse seniority classification, derived from the job title after
/// collection. Deliberately rough; the downstream scorer refines it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobLevel {
    Intern,
    Junior,
    Mid,
    Senior,
    Lead,
}

impl JobLevel {
    /// Classify a job title by keyword. Returns `None` when nothing matches,
    /// which downstream treats as mid-level by convention.
    pub fn classify(title: &str) -> Option<JobLevel> {
        let t = title.to_lowercase();
        if t.contains("intern") {
            Some(JobLevel::Intern)
        } else if t.contains("junior") || t.contains("entry") || t.contains("graduate") {
            Some(JobLevel::Junior)
        } else if t.contains("principal")
            || t.contains("staff")
            || t.contains("lead")
            || t.contains("head of")
            || t.contains("director")
        {
            Some(JobLevel::Lead)
        } else if t.contains("senior") || t.contains("sr.") || t.contains("sr ") {
            Some(JobLevel::Senior)
        } else {
            None
        }
    }
}

/// A single job listing as produced by a scraper or API connector.
///
/// Immutable once constructed. `url` is the primary external identity;
/// `raw` preserves the unmodified source payload for auditability.
/// Aggregation metadata (`collected_at`, `level`, `remote`) is attached
/// by [`Posting::with_metadata`] after cross-source dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub id: Uuid,
    pub source: String,
    pub company: String,
    pub title: String,
    pub location: String,
    pub salary: Option<String>,
    pub url: String,
    pub date_posted: DateTime<Utc>,
    pub description: Option<String>,
    pub raw: serde_json::Value,
    pub collected_at: Option<DateTime<Utc>>,
    pub level: Option<JobLevel>,
    pub remote: Option<bool>,
}

impl Posting {
    /// A posting is valid output only with a non-empty url, title, and company.
    pub fn is_valid(&self) -> bool {
        !self.url.trim().is_empty()
            && !self.title.trim().is_empty()
            && !self.company.trim().is_empty()
    }

    /// Attach post-collection metadata: collection timestamp, coarse level
    /// classification, and a remote-work flag inferred from location and
    /// description text.
    pub fn with_metadata(mut self, collected_at: DateTime<Utc>) -> Self {
        self.collected_at = Some(collected_at);
        self.level = JobLevel::classify(&self.title);
        let haystack = format!(
            "{} {}",
            self.location.to_lowercase(),
            self.description.as_deref().unwrap_or("").to_lowercase()
        );
        self.remote = Some(haystack.contains("remote") || haystack.contains("work from home"));
        self
    }

    /// Dedup key across sources: case-folded (company, title, location).
    pub fn composite_key(&self) -> (String, String, String) {
        (
            self.company.trim().to_lowercase(),
            self.title.trim().to_lowercase(),
            self.location.trim().to_lowercase(),
        )
    }
}

/// Connector-shaped payload: what a simple JSON-API connector returns before
/// validation. Converted into a [`Posting`] by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPosting {
    pub source: String,
    pub company: String,
    pub title: String,
    pub location: String,
    pub salary: Option<String>,
    pub url: String,
    pub date_posted: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub payload: serde_json::Value,
}

impl RawPosting {
    /// Validate and promote to a `Posting`. Returns `None` if the identity
    /// fields are missing; invalid postings are dropped, not errors.
    pub fn into_posting(self) -> Option<Posting> {
        let posting = Posting {
            id: Uuid::new_v4(),
            source: self.source,
            company: self.company,
            title: self.title,
            location: self.location,
            salary: self.salary,
            url: self.url,
            date_posted: self.date_posted.unwrap_or_else(Utc::now),
            description: self.description,
            raw: self.payload,
            collected_at: None,
            level: None,
            remote: None,
        };
        posting.is_valid().then_some(posting)
    }
}

/// Search parameters shared by API connectors and site scrapers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub terms: Vec<String>,
    pub location: Option<String>,
    pub remote_only: bool,
}

impl SearchParams {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms,
            location: None,
            remote_only: false,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Drop postings whose `url` was already seen, preserving first-seen order.
pub fn dedup_by_url(postings: Vec<Posting>) -> Vec<Posting> {
    let mut seen = HashSet::new();
    postings
        .into_iter()
        .filter(|p| seen.insert(p.url.clone()))
        .collect()
}

/// Cross-source dedup: two postings merge when they share an exact `url`
/// OR a case-folded (company, title, location) key. First-seen wins.
pub fn dedup_cross_source(postings: Vec<Posting>) -> Vec<Posting> {
    let mut seen_urls = HashSet::new();
    let mut seen_keys = HashSet::new();
    postings
        .into_iter()
        .filter(|p| {
            let url_new = seen_urls.insert(p.url.clone());
            let key_new = seen_keys.insert(p.composite_key());
            url_new && key_new
        })
        .collect()
}

/// Parse a job board's posted-date text into a UTC timestamp.
///
/// Boards rarely expose machine dates on search results; the common shapes
/// are "today", "just posted", "3 days ago", "30+ days ago", and ISO dates.
/// Anything unrecognized falls back to `now`.
pub fn parse_posted_date(text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let t = text.trim().to_lowercase();
    if t.is_empty() || t == "today" || t == "just posted" || t == "posted today" {
        return now;
    }
    if t == "yesterday" {
        return now - Duration::days(1);
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(t.trim_start_matches("posted "), "%Y-%m-%d")
        && let Some(dt) = date.and_hms_opt(0, 0, 0)
    {
        return dt.and_utc();
    }
    // "N days ago", "N+ days ago", "Nd ago", and hour/minute variants.
    let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
    if let Ok(n) = digits.parse::<i64>() {
        let rest = &t[digits.len()..];
        if rest.contains("day") || rest.trim_start().starts_with("d") {
            return now - Duration::days(n);
        }
        if rest.contains("hour") || rest.trim_start().starts_with("h") {
            return now - Duration::hours(n);
        }
        if rest.contains("week") || rest.trim_start().starts_with("w") {
            return now - Duration::weeks(n);
        }
        if rest.contains("month") {
            return now - Duration::days(30 * n);
        }
        if rest.contains("minute") || rest.trim_start().starts_with("m") {
            return now - Duration::minutes(n);
        }
    }
    now
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_posting(source: &str, company: &str, title: &str, location: &str, url: &str) -> Posting {
        Posting {
            id: Uuid::new_v4(),
            source: source.to_string(),
            company: company.to_string(),
            title: title.to_string(),
            location: location.to_string(),
            salary: None,
            url: url.to_string(),
            date_posted: Utc::now(),
            description: None,
            raw: serde_json::Value::Null,
            collected_at: None,
            level: None,
            remote: None,
        }
    }

    #[test]
    fn test_validity_requires_identity_fields() {
        assert!(make_posting("s", "Acme", "Engineer", "Berlin", "https://x/1").is_valid());
        assert!(!make_posting("s", "", "Engineer", "Berlin", "https://x/1").is_valid());
        assert!(!make_posting("s", "Acme", "  ", "Berlin", "https://x/1").is_valid());
        assert!(!make_posting("s", "Acme", "Engineer", "Berlin", "").is_valid());
    }

    #[test]
    fn test_dedup_by_url_keeps_first_seen() {
        let a = make_posting("a", "Acme", "Engineer", "Berlin", "https://x/1");
        let b = make_posting("b", "Other", "Analyst", "Paris", "https://x/1");
        let c = make_posting("c", "Third", "Designer", "Rome", "https://x/2");
        let out = dedup_by_url(vec![a, b, c]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].company, "Acme");
        assert_eq!(out[1].url, "https://x/2");
    }

    #[test]
    fn test_cross_source_dedup_merges_on_composite_key() {
        let a = make_posting("indeed", "Acme", "Rust Engineer", "Berlin", "https://a/1");
        let b = make_posting("lever", "ACME", "rust engineer", "berlin", "https://b/9");
        let c = make_posting("indeed", "Acme", "Go Engineer", "Berlin", "https://a/2");
        let out = dedup_cross_source(vec![a, b, c]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].source, "indeed");
    }

    #[test]
    fn test_cross_source_dedup_merges_on_url() {
        let a = make_posting("indeed", "Acme", "Rust Engineer", "Berlin", "https://a/1");
        let b = make_posting("lever", "Other", "Analyst", "Paris", "https://a/1");
        let out = dedup_cross_source(vec![a, b]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_level_classification() {
        assert_eq!(JobLevel::classify("Senior Rust Engineer"), Some(JobLevel::Senior));
        assert_eq!(JobLevel::classify("Engineering Intern"), Some(JobLevel::Intern));
        assert_eq!(JobLevel::classify("Staff Engineer"), Some(JobLevel::Lead));
        assert_eq!(JobLevel::classify("Junior Developer"), Some(JobLevel::Junior));
        assert_eq!(JobLevel::classify("Rust Engineer"), None);
    }

    #[test]
    fn test_metadata_sets_remote_flag() {
        let p = make_posting("s", "Acme", "Engineer", "Remote (EU)", "https://x/1")
            .with_metadata(Utc::now());
        assert_eq!(p.remote, Some(true));
        assert!(p.collected_at.is_some());

        let p = make_posting("s", "Acme", "Engineer", "Berlin", "https://x/1")
            .with_metadata(Utc::now());
        assert_eq!(p.remote, Some(false));
    }

    #[test]
    fn test_raw_posting_validation() {
        let raw = RawPosting {
            source: "greenhouse".into(),
            company: "Acme".into(),
            title: "Engineer".into(),
            location: "Berlin".into(),
            salary: None,
            url: "https://x/1".into(),
            date_posted: None,
            description: None,
            payload: serde_json::json!({"id": 1}),
        };
        assert!(raw.clone().into_posting().is_some());

        let mut missing_title = raw;
        missing_title.title = String::new();
        assert!(missing_title.into_posting().is_none());
    }

    #[test]
    fn test_parse_posted_date_relative() {
        let now = Utc::now();
        assert_eq!(parse_posted_date("today", now), now);
        assert_eq!(parse_posted_date("3 days ago", now), now - Duration::days(3));
        assert_eq!(parse_posted_date("30+ days ago", now), now - Duration::days(30));
        assert_eq!(parse_posted_date("2 hours ago", now), now - Duration::hours(2));
        assert_eq!(parse_posted_date("garbage", now), now);
    }

    #[test]
    fn test_parse_posted_date_iso() {
        let now = Utc::now();
        let parsed = parse_posted_date("2026-08-01", now);
        assert_eq!(parsed.format("%Y-%m-%d").to_string(), "2026-08-01");
    }
}
