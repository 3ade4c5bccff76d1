//! Registry access for the import pipeline.
//!
//! [`RegistrySource`] fetches one page for a cursor; [`RegistryPager`] turns it
//! into the finite page sequence an import walks through.

use std::collections::VecDeque;
use std::sync::Mutex;

use thiserror::Error;

use crate::models::registry::START_CURSOR;
use crate::models::{RegistryFilters, RegistryPage};

/// Errors raised while talking to the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No usable authentication method. Never retried.
    #[error("Registry configuration error: {0}")]
    Configuration(String),

    #[error("Registry request failed: {0}")]
    Http(String),

    #[error("Registry returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Registry rate limit exceeded (HTTP 429)")]
    RateLimited,

    #[error("Invalid registry response: {0}")]
    Decode(String),
}

impl RegistryError {
    /// Every request-level failure is retried, whatever the HTTP status.
    /// Missing credentials and undecodable bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Http(_) | RegistryError::RateLimited | RegistryError::Status { .. } => {
                true
            }
            RegistryError::Configuration(_) | RegistryError::Decode(_) => false,
        }
    }
}

/// Fetches single pages of registry establishments.
#[async_trait::async_trait]
pub trait RegistrySource: Send + Sync {
    /// Fetch the page starting at `cursor` with the given query filters.
    async fn fetch_page(
        &self,
        filters: &RegistryFilters,
        cursor: &str,
    ) -> Result<RegistryPage, RegistryError>;
}

/// Lazy, finite, non-restartable walk over registry pages.
///
/// The walk ends after a page whose next cursor is absent, blank, or equal
/// to the cursor that fetched it, and after the first fetch error.
pub struct RegistryPager<'a, S: RegistrySource + ?Sized> {
    source: &'a S,
    filters: RegistryFilters,
    cursor: Option<String>,
}

impl<'a, S: RegistrySource + ?Sized> RegistryPager<'a, S> {
    /// Start at `resume_cursor` when given, otherwise at the first page.
    pub fn new(source: &'a S, filters: RegistryFilters, resume_cursor: Option<&str>) -> Self {
        let start = resume_cursor
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(START_CURSOR);
        Self {
            source,
            filters,
            cursor: Some(start.to_string()),
        }
    }

    /// Cursor of the next page to fetch, `None` once the walk has ended.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor.is_none()
    }

    /// Fetch the next page. Returns `None` once the walk has ended.
    ///
    /// The returned page carries the registry's next cursor as reported,
    /// normalized to `None` when the walk stops after it.
    pub async fn next_page(&mut self) -> Option<Result<RegistryPage, RegistryError>> {
        let cursor = self.cursor.take()?;

        let mut page = match self.source.fetch_page(&self.filters, &cursor).await {
            Ok(page) => page,
            Err(err) => return Some(Err(err)),
        };

        let next = page
            .next_cursor
            .take()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        match next {
            Some(next) if next == cursor => {
                tracing::warn!(cursor = %cursor, "Registry repeated its cursor, stopping pagination");
                page.next_cursor = None;
            }
            Some(next) => {
                page.next_cursor = Some(next.clone());
                self.cursor = Some(next);
            }
            None => page.next_cursor = None,
        }

        Some(Ok(page))
    }
}

/// Scripted registry for development and testing.
///
/// Serves queued responses in order and records every request. Once the
/// script runs out it answers with an empty final page.
#[derive(Debug, Default)]
pub struct MockRegistrySource {
    responses: Mutex<VecDeque<Result<RegistryPage, RegistryError>>>,
    requests: Mutex<Vec<(RegistryFilters, String)>>,
}

impl MockRegistrySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a page of records followed by `next_cursor`.
    pub fn with_page(self, records: Vec<serde_json::Value>, next_cursor: Option<&str>) -> Self {
        self.push(Ok(RegistryPage {
            records,
            next_cursor: next_cursor.map(str::to_string),
        }));
        self
    }

    /// Queue a failed fetch.
    pub fn with_error(self, error: RegistryError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn push(&self, response: Result<RegistryPage, RegistryError>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// Cursors requested so far, in order.
    pub fn requested_cursors(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|r| r.iter().map(|(_, cursor)| cursor.clone()).collect())
            .unwrap_or_default()
    }

    /// Filters of every request so far, in order.
    pub fn requested_filters(&self) -> Vec<RegistryFilters> {
        self.requests
            .lock()
            .map(|r| r.iter().map(|(filters, _)| filters.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl RegistrySource for MockRegistrySource {
    async fn fetch_page(
        &self,
        filters: &RegistryFilters,
        cursor: &str,
    ) -> Result<RegistryPage, RegistryError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((filters.clone(), cursor.to_string()));
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Ok(RegistryPage::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn drain<S: RegistrySource>(pager: &mut RegistryPager<'_, S>) -> Vec<RegistryPage> {
        let mut pages = Vec::new();
        while let Some(page) = pager.next_page().await {
            pages.push(page.unwrap());
        }
        pages
    }

    #[test]
    fn test_retryable_errors() {
        assert!(RegistryError::Http("connection reset".into()).is_retryable());
        assert!(RegistryError::RateLimited.is_retryable());
        assert!(RegistryError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(RegistryError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(RegistryError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!RegistryError::Configuration("none".into()).is_retryable());
        assert!(!RegistryError::Decode("bad json".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_walks_until_null_cursor() {
        let source = MockRegistrySource::new()
            .with_page(vec![json!({"siret": "1"})], Some("c1"))
            .with_page(vec![json!({"siret": "2"})], None);

        let mut pager = RegistryPager::new(&source, RegistryFilters::new(), None);
        let pages = drain(&mut pager).await;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].next_cursor.as_deref(), Some("c1"));
        assert_eq!(pages[1].next_cursor, None);
        assert_eq!(source.requested_cursors(), vec!["*", "c1"]);
        assert!(pager.is_finished());
    }

    #[tokio::test]
    async fn test_repeated_cursor_stops() {
        let source = MockRegistrySource::new()
            .with_page(vec![json!({"siret": "1"})], Some("c1"))
            .with_page(vec![json!({"siret": "2"})], Some("c1"))
            .with_page(vec![json!({"siret": "3"})], Some("c2"));

        let mut pager = RegistryPager::new(&source, RegistryFilters::new(), None);
        let pages = drain(&mut pager).await;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].next_cursor, None);
        assert_eq!(source.requested_cursors(), vec!["*", "c1"]);
    }

    #[tokio::test]
    async fn test_blank_cursor_stops() {
        let source = MockRegistrySource::new().with_page(vec![], Some(""));

        let mut pager = RegistryPager::new(&source, RegistryFilters::new(), None);
        let pages = drain(&mut pager).await;

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].next_cursor, None);
    }

    #[tokio::test]
    async fn test_resume_cursor_and_filters_are_forwarded() {
        let source = MockRegistrySource::new().with_page(vec![], None);
        let filters = RegistryFilters::from([("codeNaf".to_string(), "62.01Z".to_string())]);

        let mut pager = RegistryPager::new(&source, filters.clone(), Some("resume-here"));
        assert_eq!(pager.cursor(), Some("resume-here"));
        drain(&mut pager).await;

        assert_eq!(source.requested_cursors(), vec!["resume-here"]);
        assert_eq!(source.requested_filters(), vec![filters]);
    }

    #[tokio::test]
    async fn test_blank_resume_cursor_starts_from_beginning() {
        let source = MockRegistrySource::new();
        let pager = RegistryPager::new(&source, RegistryFilters::new(), Some(" "));
        assert_eq!(pager.cursor(), Some(START_CURSOR));
    }

    #[tokio::test]
    async fn test_error_ends_the_walk() {
        let source = MockRegistrySource::new()
            .with_page(vec![], Some("c1"))
            .with_error(RegistryError::RateLimited)
            .with_page(vec![], None);

        let mut pager = RegistryPager::new(&source, RegistryFilters::new(), None);
        assert!(pager.next_page().await.unwrap().is_ok());
        assert!(matches!(
            pager.next_page().await,
            Some(Err(RegistryError::RateLimited))
        ));
        assert!(pager.next_page().await.is_none());
        assert_eq!(source.requested_cursors().len(), 2);
    }
}
