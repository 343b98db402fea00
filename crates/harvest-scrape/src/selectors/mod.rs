//! Per-site, per-field extraction rules with automatic failure detection,
//! fallback chains, and heuristic regeneration of broken rules.
//!
//! Every extraction attempt updates the rule's counters; when the primary
//! selector stops matching, the repair path (see [`repair`]) first walks the
//! fallback chain and then tries to regenerate a selector from the page
//! itself. Rules are persisted as a JSON document keyed by site → purpose so
//! repairs survive restarts. Absence of a selector is a routine outcome,
//! never an error.

mod repair;

pub mod health;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use harvest_core::similarity::{SimilarityFn, token_set_ratio};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// What a selector extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Purpose {
    CardTitle,
    CardCompany,
    CardLocation,
    CardSalary,
    CardDate,
    Description,
}

impl Purpose {
    pub const ALL: [Purpose; 6] = [
        Purpose::CardTitle,
        Purpose::CardCompany,
        Purpose::CardLocation,
        Purpose::CardSalary,
        Purpose::CardDate,
        Purpose::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::CardTitle => "job_card_title",
            Purpose::CardCompany => "job_card_company",
            Purpose::CardLocation => "job_card_location",
            Purpose::CardSalary => "job_card_salary",
            Purpose::CardDate => "job_card_date",
            Purpose::Description => "job_description",
        }
    }

    pub fn from_str(s: &str) -> Option<Purpose> {
        Purpose::ALL.iter().copied().find(|p| p.as_str() == s)
    }

    /// Required purposes make a card unusable when extraction fails.
    pub fn required(&self) -> bool {
        matches!(
            self,
            Purpose::CardTitle | Purpose::CardCompany | Purpose::CardLocation
        )
    }
}

/// One extraction rule for a (site, purpose) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorRule {
    pub selector: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
}

impl SelectorRule {
    pub fn new(selector: &str, fallbacks: &[&str], required: bool) -> Self {
        Self {
            selector: selector.to_string(),
            fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
            required,
            success_count: 0,
            failure_count: 0,
            last_success: None,
        }
    }
}

/// Persisted document shape: site → purpose string → rule.
type Rules = BTreeMap<String, BTreeMap<String, SelectorRule>>;

/// Collapse an element's text nodes into a single whitespace-normalized line.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First non-empty text match for `selector` inside `scope`.
/// Unparseable selectors behave as non-matching.
pub fn first_match_text(scope: ElementRef<'_>, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    scope
        .select(&sel)
        .map(element_text)
        .find(|t| !t.is_empty())
}

/// Purpose-specific sanity check on extracted text.
pub fn validate_for_purpose(purpose: Purpose, text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    let words = text.split_whitespace().count();
    match purpose {
        Purpose::CardTitle => (2..=7).contains(&words),
        Purpose::CardCompany => (1..=4).contains(&words),
        Purpose::CardLocation => {
            let lower = text.to_lowercase();
            text.contains(',') || lower.contains("remote") || lower.contains("hybrid")
        }
        Purpose::CardSalary => text.chars().any(|c| c.is_ascii_digit()),
        Purpose::CardDate | Purpose::Description => true,
    }
}

/// Owner of all selector rules, shared by the scrapers of one engine.
///
/// Internally synchronized: counter updates are commutative and selector
/// rewrites are idempotent overwrites, so a plain mutex suffices.
pub struct SelectorMaintainer {
    path: Option<PathBuf>,
    similarity: SimilarityFn,
    rules: Mutex<Rules>,
}

impl SelectorMaintainer {
    /// Load rules from `path`, degrading to an empty in-memory set when the
    /// file is missing or unreadable. The path is remembered for persistence.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rules = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Rules>(&raw) {
                Ok(rules) => rules,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Corrupt selector file, starting empty");
                    Rules::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Rules::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read selector file, starting empty");
                Rules::new()
            }
        };
        Self {
            path: Some(path),
            similarity: token_set_ratio,
            rules: Mutex::new(rules),
        }
    }

    /// In-memory only; repairs are not persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            similarity: token_set_ratio,
            rules: Mutex::new(Rules::new()),
        }
    }

    pub fn with_similarity(mut self, similarity: SimilarityFn) -> Self {
        self.similarity = similarity;
        self
    }

    /// Seed default rules for a site, keeping any loaded (possibly repaired)
    /// rule that already exists.
    pub fn ensure_defaults<'a>(
        &self,
        site: &str,
        defaults: impl IntoIterator<Item = (Purpose, &'a [&'a str])>,
    ) {
        let mut rules = self.rules.lock().unwrap();
        let site_rules = rules.entry(site.to_string()).or_default();
        for (purpose, selectors) in defaults {
            let Some((primary, fallbacks)) = selectors.split_first() else {
                continue;
            };
            site_rules
                .entry(purpose.as_str().to_string())
                .or_insert_with(|| SelectorRule::new(primary, fallbacks, purpose.required()));
        }
    }

    pub fn get_selector(&self, site: &str, purpose: Purpose) -> Option<String> {
        self.rules
            .lock()
            .unwrap()
            .get(site)
            .and_then(|m| m.get(purpose.as_str()))
            .map(|r| r.selector.clone())
    }

    /// Snapshot of a rule, for health checks and tests.
    pub fn rule(&self, site: &str, purpose: Purpose) -> Option<SelectorRule> {
        self.rules
            .lock()
            .unwrap()
            .get(site)
            .and_then(|m| m.get(purpose.as_str()))
            .cloned()
    }

    pub fn report_success(&self, site: &str, purpose: Purpose) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.get_mut(site).and_then(|m| m.get_mut(purpose.as_str())) {
            rule.success_count += 1;
            rule.last_success = Some(Utc::now());
        }
    }

    pub fn report_failure(&self, site: &str, purpose: Purpose) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.get_mut(site).and_then(|m| m.get_mut(purpose.as_str())) {
            rule.failure_count += 1;
        }
    }

    /// Attempt to fix a broken selector against a live page.
    ///
    /// 1. Walk the fallback chain; promote the first fallback whose match
    ///    passes purpose validation (and similarity ≥ 0.5 against
    ///    `sample`, when given).
    /// 2. Otherwise regenerate a selector heuristically from the page.
    ///
    /// Returns the repaired selector, already persisted, or `None`, in
    /// which case the caller continues without a value.
    pub fn repair(
        &self,
        site: &str,
        purpose: Purpose,
        html: &str,
        sample: Option<&str>,
    ) -> Option<String> {
        let doc = Html::parse_document(html);

        let fallbacks = self
            .rule(site, purpose)
            .map(|r| r.fallbacks)
            .unwrap_or_default();

        for fallback in fallbacks {
            let Some(text) = first_match_text(doc.root_element(), &fallback) else {
                continue;
            };
            if !validate_for_purpose(purpose, &text) {
                continue;
            }
            if let Some(sample) = sample
                && (self.similarity)(sample, &text) < 0.5
            {
                continue;
            }
            tracing::info!(
                site = %site,
                purpose = purpose.as_str(),
                selector = %fallback,
                "Promoting fallback selector"
            );
            self.promote(site, purpose, &fallback);
            return Some(fallback);
        }

        let regenerated = repair::regenerate(&doc, purpose, sample, self.similarity)?;
        tracing::info!(
            site = %site,
            purpose = purpose.as_str(),
            selector = %regenerated,
            "Regenerated selector from page structure"
        );
        self.adopt(site, purpose, &regenerated);
        Some(regenerated)
    }

    /// Maintainer-mediated extraction within `scope` (a result card, or the
    /// document root for page-level fields). `page_html` is the full page
    /// the repair path scans when the primary selector fails.
    pub fn extract(
        &self,
        site: &str,
        purpose: Purpose,
        scope: ElementRef<'_>,
        page_html: &str,
        sample: Option<&str>,
    ) -> Option<String> {
        let selector = self.get_selector(site, purpose)?;

        if let Some(text) = first_match_text(scope, &selector) {
            self.report_success(site, purpose);
            return Some(text);
        }
        self.report_failure(site, purpose);

        let repaired = self.repair(site, purpose, page_html, sample)?;
        if let Some(text) = first_match_text(scope, &repaired) {
            self.report_success(site, purpose);
            return Some(text);
        }
        None
    }

    /// Make `fallback` the primary selector, demoting the old primary to the
    /// back of the chain.
    fn promote(&self, site: &str, purpose: Purpose, fallback: &str) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.get_mut(site).and_then(|m| m.get_mut(purpose.as_str())) {
            let old = std::mem::replace(&mut rule.selector, fallback.to_string());
            rule.fallbacks.retain(|s| s != fallback);
            if old != fallback && !rule.fallbacks.contains(&old) {
                rule.fallbacks.push(old);
            }
        }
        self.persist(&rules);
    }

    /// Install a regenerated selector as primary and at the front of the
    /// fallback chain, so it survives future promotions.
    fn adopt(&self, site: &str, purpose: Purpose, selector: &str) {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .entry(site.to_string())
            .or_default()
            .entry(purpose.as_str().to_string())
            .or_insert_with(|| SelectorRule::new(selector, &[], purpose.required()));
        rule.selector = selector.to_string();
        rule.fallbacks.retain(|s| s != selector);
        rule.fallbacks.insert(0, selector.to_string());
        self.persist(&rules);
    }

    /// Write the rules document. Failures degrade to in-memory-only rules.
    fn persist(&self, rules: &Rules) {
        let Some(path) = &self.path else {
            return;
        };
        let serialized = match serde_json::to_string_pretty(rules) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Selector serialization failed");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, serialized) {
            tracing::warn!(path = %path.display(), error = %e, "Selector persistence failed, continuing in memory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "indeed";

    const CARD_PAGE: &str = r#"<html><body>
        <div class="results">
          <div class="job-card">
            <h2 class="title-new">Senior Rust Engineer</h2>
            <span class="company-name">Acme Corp</span>
            <span class="meta-location">Berlin, Germany</span>
          </div>
        </div>
    </body></html>"#;

    fn seeded_maintainer() -> SelectorMaintainer {
        let m = SelectorMaintainer::in_memory();
        m.ensure_defaults(
            SITE,
            [
                (Purpose::CardTitle, &["h2.jobTitle", "h2.title-new", "h2"][..]),
                (Purpose::CardCompany, &["span.company-name"][..]),
            ],
        );
        m
    }

    #[test]
    fn test_purpose_string_round_trip() {
        for p in Purpose::ALL {
            assert_eq!(Purpose::from_str(p.as_str()), Some(p));
        }
        assert_eq!(Purpose::from_str("job_card_title"), Some(Purpose::CardTitle));
        assert!(Purpose::from_str("bogus").is_none());
    }

    #[test]
    fn test_validation_rules() {
        assert!(validate_for_purpose(Purpose::CardTitle, "Senior Rust Engineer"));
        assert!(!validate_for_purpose(Purpose::CardTitle, "Engineer"));
        assert!(!validate_for_purpose(
            Purpose::CardTitle,
            "one two three four five six seven eight"
        ));
        assert!(validate_for_purpose(Purpose::CardCompany, "Acme"));
        assert!(!validate_for_purpose(Purpose::CardCompany, "a b c d e"));
        assert!(validate_for_purpose(Purpose::CardLocation, "Berlin, Germany"));
        assert!(validate_for_purpose(Purpose::CardLocation, "Remote"));
        assert!(validate_for_purpose(Purpose::CardLocation, "Hybrid in Warsaw"));
        assert!(!validate_for_purpose(Purpose::CardLocation, "Berlin"));
        assert!(validate_for_purpose(Purpose::CardSalary, "$120,000 - $150,000"));
        assert!(!validate_for_purpose(Purpose::CardSalary, "competitive"));
        assert!(!validate_for_purpose(Purpose::CardDate, "   "));
    }

    #[test]
    fn test_counters_and_last_success() {
        let m = seeded_maintainer();
        m.report_success(SITE, Purpose::CardTitle);
        m.report_success(SITE, Purpose::CardTitle);
        m.report_failure(SITE, Purpose::CardTitle);

        let rule = m.rule(SITE, Purpose::CardTitle).unwrap();
        assert_eq!(rule.success_count, 2);
        assert_eq!(rule.failure_count, 1);
        assert!(rule.last_success.is_some());
    }

    #[test]
    fn test_repair_promotes_working_fallback() {
        let m = seeded_maintainer();
        // Primary "h2.jobTitle" does not match CARD_PAGE; "h2.title-new" does.
        let repaired = m.repair(SITE, Purpose::CardTitle, CARD_PAGE, None).unwrap();
        assert_eq!(repaired, "h2.title-new");

        let rule = m.rule(SITE, Purpose::CardTitle).unwrap();
        assert_eq!(rule.selector, "h2.title-new");
        // Old primary demoted into the chain, not lost.
        assert!(rule.fallbacks.contains(&"h2.jobTitle".to_string()));
        assert!(!rule.fallbacks.contains(&"h2.title-new".to_string()));
    }

    #[test]
    fn test_repair_respects_similarity_threshold() {
        let m = seeded_maintainer();
        // The fallback matches, but its text has nothing in common with the
        // sample, so the chain is rejected and regeneration runs instead.
        let repaired = m.repair(
            SITE,
            Purpose::CardTitle,
            CARD_PAGE,
            Some("Completely Different Posting Name"),
        );
        assert_ne!(repaired.as_deref(), Some("h2.title-new"));
    }

    #[test]
    fn test_repair_is_idempotent_on_stable_page() {
        let m = seeded_maintainer();
        let repaired = m.repair(SITE, Purpose::CardTitle, CARD_PAGE, None).unwrap();

        // With the repaired selector in place, extraction succeeds directly:
        // same failure counter, one more success, no second repair.
        let failures_before = m.rule(SITE, Purpose::CardTitle).unwrap().failure_count;
        let doc = Html::parse_document(CARD_PAGE);
        let text = m
            .extract(SITE, Purpose::CardTitle, doc.root_element(), CARD_PAGE, None)
            .unwrap();
        assert_eq!(text, "Senior Rust Engineer");
        let rule = m.rule(SITE, Purpose::CardTitle).unwrap();
        assert_eq!(rule.selector, repaired);
        assert_eq!(rule.failure_count, failures_before);
    }

    #[test]
    fn test_extract_reports_success_on_primary() {
        let m = seeded_maintainer();
        let doc = Html::parse_document(CARD_PAGE);
        let text = m
            .extract(SITE, Purpose::CardCompany, doc.root_element(), CARD_PAGE, None)
            .unwrap();
        assert_eq!(text, "Acme Corp");
        let rule = m.rule(SITE, Purpose::CardCompany).unwrap();
        assert_eq!(rule.success_count, 1);
        assert_eq!(rule.failure_count, 0);
    }

    #[test]
    fn test_extract_without_rule_is_absent() {
        let m = SelectorMaintainer::in_memory();
        let doc = Html::parse_document(CARD_PAGE);
        assert!(
            m.extract("unknown", Purpose::CardTitle, doc.root_element(), CARD_PAGE, None)
                .is_none()
        );
    }

    #[test]
    fn test_persistence_round_trip_and_promotion_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selectors.json");

        {
            let m = SelectorMaintainer::load(&path);
            m.ensure_defaults(
                SITE,
                [(Purpose::CardTitle, &["h2.jobTitle", "h2.title-new"][..])],
            );
            m.repair(SITE, Purpose::CardTitle, CARD_PAGE, None).unwrap();
        }

        // A fresh maintainer sees the promoted selector.
        let m = SelectorMaintainer::load(&path);
        let rule = m.rule(SITE, Purpose::CardTitle).unwrap();
        assert_eq!(rule.selector, "h2.title-new");
        assert!(rule.required);
    }

    #[test]
    fn test_missing_selector_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let m = SelectorMaintainer::load(dir.path().join("absent.json"));
        assert!(m.get_selector(SITE, Purpose::CardTitle).is_none());
    }

    #[test]
    fn test_corrupt_selector_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selectors.json");
        std::fs::write(&path, "not json at all").unwrap();
        let m = SelectorMaintainer::load(&path);
        assert!(m.get_selector(SITE, Purpose::CardTitle).is_none());
    }

    #[test]
    fn test_ensure_defaults_keeps_loaded_rules() {
        let m = seeded_maintainer();
        m.repair(SITE, Purpose::CardTitle, CARD_PAGE, None).unwrap();
        // Re-seeding (e.g. scraper reconstruction) must not clobber repairs.
        m.ensure_defaults(SITE, [(Purpose::CardTitle, &["h2.jobTitle"][..])]);
        assert_eq!(
            m.get_selector(SITE, Purpose::CardTitle).as_deref(),
            Some("h2.title-new")
        );
    }
}
