//! Per-batch scrape statistics.
//!
//! Each scraper owns one [`StatsRecorder`]; concurrent per-term tasks bump
//! atomic counters through it, and the batch driver snapshots the counters
//! into an owned [`ScrapeStats`] at the end of a run. Snapshots are plain
//! data; nothing is shared across scraper instances or across runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters for one `fetch_all_jobs` run. Read at the end for logging;
/// not persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeStats {
    pub requests_made: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub jobs_found: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub captchas_encountered: u64,
    pub captchas_solved: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    requests_made: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    jobs_found: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    captchas_encountered: AtomicU64,
    captchas_solved: AtomicU64,
}

/// Cheap-to-clone handle over the atomic counters of one batch.
#[derive(Debug, Clone, Default)]
pub struct StatsRecorder {
    counters: Arc<Counters>,
    started_at: Arc<std::sync::Mutex<Option<DateTime<Utc>>>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a batch, clearing counters from any previous run.
    pub fn start_batch(&self) {
        self.counters.requests_made.store(0, Ordering::Relaxed);
        self.counters.successful_requests.store(0, Ordering::Relaxed);
        self.counters.failed_requests.store(0, Ordering::Relaxed);
        self.counters.jobs_found.store(0, Ordering::Relaxed);
        self.counters.cache_hits.store(0, Ordering::Relaxed);
        self.counters.cache_misses.store(0, Ordering::Relaxed);
        self.counters.captchas_encountered.store(0, Ordering::Relaxed);
        self.counters.captchas_solved.store(0, Ordering::Relaxed);
        *self.started_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn record_request(&self) {
        self.counters.requests_made.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.counters.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.counters.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_jobs(&self, count: u64) {
        self.counters.jobs_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_captcha(&self) {
        self.counters.captchas_encountered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_captcha_solved(&self) {
        self.counters.captchas_solved.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters into an owned stats struct, stamping the end time.
    pub fn finish_batch(&self) -> ScrapeStats {
        ScrapeStats {
            requests_made: self.counters.requests_made.load(Ordering::Relaxed),
            successful_requests: self.counters.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.counters.failed_requests.load(Ordering::Relaxed),
            jobs_found: self.counters.jobs_found.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            captchas_encountered: self.counters.captchas_encountered.load(Ordering::Relaxed),
            captchas_solved: self.counters.captchas_solved.load(Ordering::Relaxed),
            started_at: *self.started_at.lock().unwrap(),
            finished_at: Some(Utc::now()),
        }
    }
}
