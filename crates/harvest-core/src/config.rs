//! Engine configuration.
//!
//! Loaded once at startup from a JSON file. Misconfiguration is the one
//! fatal error class in the system: validation failures surface as
//! [`AppError::ConfigError`] before any scraper is constructed, never mid-run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

fn default_true() -> bool {
    true
}

fn default_rpm() -> u32 {
    10
}

fn default_cache_max_age_secs() -> u64 {
    3600
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".harvest-cache")
}

fn default_selector_file() -> PathBuf {
    PathBuf::from("selectors.json")
}

/// Per-source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,

    /// Proxy URL for this source's requests (e.g. socks5://127.0.0.1:9050).
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default = "default_true")]
    pub browser_simulation: bool,

    /// Fetch each posting's detail page for the full description. Doubles
    /// the request count per result.
    #[serde(default = "default_true")]
    pub fetch_descriptions: bool,

    /// External CAPTCHA-solving service. Detection always runs; solving is
    /// attempted only when both endpoint and key are configured.
    #[serde(default)]
    pub captcha_service_url: Option<String>,

    #[serde(default)]
    pub captcha_api_key: Option<String>,

    /// Board/org slugs for API-backed sources (Greenhouse boards, Lever
    /// orgs). Ignored by HTML scrapers.
    #[serde(default)]
    pub boards: Vec<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: default_rpm(),
            cache_enabled: true,
            cache_max_age_secs: default_cache_max_age_secs(),
            proxy: None,
            browser_simulation: true,
            fetch_descriptions: true,
            captcha_service_url: None,
            captcha_api_key: None,
            boards: Vec::new(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_selector_file")]
    pub selector_file: PathBuf,

    /// Bounded fan-out across sources in the aggregator.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional user-agent pool for browser simulation. Empty means built-in.
    #[serde(default)]
    pub user_agents: Vec<String>,

    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            selector_file: default_selector_file(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            user_agents: Vec::new(),
            sources: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("invalid config {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// Settings for a source, falling back to defaults when unlisted.
    pub fn source(&self, id: &str) -> SourceConfig {
        self.sources.get(id).cloned().unwrap_or_default()
    }

    /// Fail fast on misconfiguration. `known_sources` is the closed set of
    /// source identifiers the registry can construct.
    pub fn validate(&self, known_sources: &[&str]) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::ConfigError("concurrency must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(AppError::ConfigError("timeout_secs must be at least 1".into()));
        }
        for (id, source) in &self.sources {
            if !known_sources.contains(&id.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "unknown source '{id}' (known: {})",
                    known_sources.join(", ")
                )));
            }
            if source.enabled && source.requests_per_minute == 0 {
                return Err(AppError::ConfigError(format!(
                    "source '{id}' is enabled with requests_per_minute = 0"
                )));
            }
            if source.captcha_service_url.is_some() && source.captcha_api_key.is_none() {
                return Err(AppError::ConfigError(format!(
                    "source '{id}' sets captcha_service_url without captcha_api_key"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN: &[&str] = &["indeed", "linkedin", "ziprecruiter", "greenhouse"];

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate(KNOWN).is_ok());
        assert_eq!(config.source("indeed").requests_per_minute, 10);
        assert!(config.source("indeed").enabled);
    }

    #[test]
    fn test_unknown_source_is_fatal() {
        let mut config = EngineConfig::default();
        config.sources.insert("monsterboard".into(), SourceConfig::default());
        let err = config.validate(KNOWN).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
        assert!(err.to_string().contains("monsterboard"));
    }

    #[test]
    fn test_enabled_source_with_zero_budget_is_fatal() {
        let mut config = EngineConfig::default();
        config.sources.insert(
            "indeed".into(),
            SourceConfig {
                requests_per_minute: 0,
                ..SourceConfig::default()
            },
        );
        assert!(config.validate(KNOWN).is_err());

        // Disabled sources may carry any budget.
        config.sources.insert(
            "indeed".into(),
            SourceConfig {
                enabled: false,
                requests_per_minute: 0,
                ..SourceConfig::default()
            },
        );
        assert!(config.validate(KNOWN).is_ok());
    }

    #[test]
    fn test_captcha_service_requires_key() {
        let mut config = EngineConfig::default();
        config.sources.insert(
            "indeed".into(),
            SourceConfig {
                captcha_service_url: Some("https://solver.example.com".into()),
                ..SourceConfig::default()
            },
        );
        assert!(config.validate(KNOWN).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "concurrency": 2,
                "sources": {
                    "indeed": { "requests_per_minute": 5, "browser_simulation": false }
                }
            }"#,
        )
        .unwrap();

        let config = EngineConfig::from_path(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.timeout_secs, 30);
        let indeed = config.source("indeed");
        assert_eq!(indeed.requests_per_minute, 5);
        assert!(!indeed.browser_simulation);
        assert!(indeed.cache_enabled);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{nope").unwrap();
        assert!(matches!(
            EngineConfig::from_path(&path),
            Err(AppError::ConfigError(_))
        ));
    }
}
