//! Scraping engine: fetch pipeline, CAPTCHA detection, self-maintaining
//! CSS selectors, board-specific scrapers, API connectors, and the
//! aggregation service that ties them together.

pub mod aggregator;
pub mod captcha;
pub mod clean;
pub mod client;
pub mod connectors;
pub mod orchestrator;
pub mod profile;
pub mod selectors;
pub mod sites;

pub use aggregator::{AggregateReport, JobAggregatorService, build_aggregator};
pub use client::{PageClient, ReqwestPageFetcher};
pub use orchestrator::ScraperOrchestrator;
pub use sites::{SiteScraper, SourceReport};
