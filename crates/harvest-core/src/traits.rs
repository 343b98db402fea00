use std::collections::HashMap;
use std::future::Future;

use crate::error::AppError;

/// A prepared outgoing request: target URL plus the header set chosen by the
/// browser-profile layer.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

/// A successfully fetched page, with the response metadata the cache stores.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub content: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
}

/// Fetches a single page over the network.
///
/// Implementations perform exactly one HTTP exchange: no retries, no caching,
/// no rate limiting. Those concerns are layered on top by the page client.
pub trait PageFetcher: Send + Sync + Clone {
    fn fetch(&self, req: &PageRequest) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}
