pub mod cache;
pub mod config;
pub mod error;
pub mod posting;
pub mod ratelimit;
pub mod retry;
pub mod similarity;
pub mod stats;
pub mod testutil;
pub mod traits;
pub mod util;

pub use cache::{CacheConfig, CacheEntry, ResponseCache};
pub use config::{EngineConfig, SourceConfig};
pub use error::AppError;
pub use posting::{Posting, RawPosting, SearchParams};
pub use ratelimit::{HostRateLimiter, RateLimitConfig};
pub use retry::RetryPolicy;
pub use stats::{ScrapeStats, StatsRecorder};
pub use traits::{FetchedPage, PageFetcher, PageRequest};
