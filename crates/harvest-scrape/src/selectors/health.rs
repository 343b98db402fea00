//! Scheduled selector verification bookkeeping.
//!
//! The checker itself is a recorder: scrapers run a real search against
//! their site and report which purposes extracted successfully. Rates are
//! kept per (site, purpose) and surfaced in a report, with sites below the
//! alert threshold flagged for attention.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Purpose;

/// A (site, purpose) drops into alert state below this success rate.
pub const ALERT_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Default)]
struct HealthRecord {
    successes: u64,
    failures: u64,
    last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReportEntry {
    pub site: String,
    pub purpose: String,
    pub checks: u64,
    pub success_rate: f64,
    pub alert: bool,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct SelectorHealthChecker {
    records: Mutex<BTreeMap<(String, String), HealthRecord>>,
}

impl SelectorHealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, site: &str, purpose: Purpose, ok: bool) {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry((site.to_string(), purpose.as_str().to_string()))
            .or_default();
        if ok {
            record.successes += 1;
        } else {
            record.failures += 1;
        }
        record.last_check = Some(Utc::now());
    }

    /// Success rate in percent, `None` before the first check.
    pub fn success_rate(&self, site: &str, purpose: Purpose) -> Option<f64> {
        let records = self.records.lock().unwrap();
        let record = records.get(&(site.to_string(), purpose.as_str().to_string()))?;
        let total = record.successes + record.failures;
        if total == 0 {
            return None;
        }
        Some(100.0 * record.successes as f64 / total as f64)
    }

    pub fn report(&self) -> Vec<HealthReportEntry> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .map(|((site, purpose), record)| {
                let total = record.successes + record.failures;
                let rate = if total == 0 {
                    0.0
                } else {
                    100.0 * record.successes as f64 / total as f64
                };
                HealthReportEntry {
                    site: site.clone(),
                    purpose: purpose.clone(),
                    checks: total,
                    success_rate: rate,
                    alert: rate < ALERT_THRESHOLD,
                    last_check: record.last_check,
                }
            })
            .collect()
    }

    pub fn reset(&self) {
        self.records.lock().unwrap().clear();
    }
}
