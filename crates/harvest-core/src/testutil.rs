//! Test utilities: mock implementations for dependency injection.
//!
//! Handwritten mocks with `Arc<Mutex<_>>` interior mutability so tests can
//! assert on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::posting::Posting;
use crate::traits::{FetchedPage, PageFetcher, PageRequest};

/// What a mock route answers with. Routes are persistent: the same pattern
/// answers every matching request, unlike a one-shot response queue.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A 200 page with the given body.
    Page(String),
    /// An access denial (403-style) for the request's host.
    Deny,
    /// A transient network failure.
    NetworkError(String),
}

/// Mock page fetcher with substring-routed responses.
///
/// The first route whose pattern is contained in the request URL answers;
/// unrouted URLs get a default page. All request URLs are recorded.
#[derive(Clone, Default)]
pub struct MockPageFetcher {
    routes: Arc<Mutex<Vec<(String, MockResponse)>>>,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl MockPageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with the same page.
    pub fn with_page(html: &str) -> Self {
        let fetcher = Self::new();
        fetcher.route("", MockResponse::Page(html.to_string()));
        fetcher
    }

    /// Fail every request with a network error.
    pub fn always_failing(message: &str) -> Self {
        let fetcher = Self::new();
        fetcher.route("", MockResponse::NetworkError(message.to_string()));
        fetcher
    }

    pub fn route(&self, pattern: &str, response: MockResponse) {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), response));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, req: &PageRequest) -> Result<FetchedPage, AppError> {
        self.requests.lock().unwrap().push(req.url.clone());

        let routes = self.routes.lock().unwrap();
        let matched = routes
            .iter()
            .find(|(pattern, _)| req.url.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());
        drop(routes);

        match matched {
            Some(MockResponse::Page(body)) => Ok(FetchedPage {
                url: req.url.clone(),
                content: body,
                status_code: 200,
                headers: HashMap::new(),
            }),
            Some(MockResponse::Deny) => Err(AppError::AccessDenied {
                host: req.url.clone(),
                reason: "mock denial".into(),
            }),
            Some(MockResponse::NetworkError(message)) => Err(AppError::NetworkError(message)),
            None => Ok(FetchedPage {
                url: req.url.clone(),
                content: "<html><body>default</body></html>".to_string(),
                status_code: 200,
                headers: HashMap::new(),
            }),
        }
    }
}

/// Create a posting for tests.
pub fn make_test_posting(source: &str, company: &str, title: &str, url: &str) -> Posting {
    Posting {
        id: Uuid::new_v4(),
        source: source.to_string(),
        company: company.to_string(),
        title: title.to_string(),
        location: "Berlin, Germany".to_string(),
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
