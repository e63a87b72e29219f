//! Mock extractor for testing
//!
//! Responses are keyed by document name. Clones share state, so a test can
//! keep a handle and inspect how many times the backend was called.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{BillCandidate, DocumentRef};
use super::BillExtractor;

#[derive(Debug, Clone)]
enum MockResponse {
    Candidate(BillCandidate),
    Failure(String),
    /// Sleep before answering (to exercise timeouts)
    Delayed(Duration, BillCandidate),
}

/// Mock extraction backend
#[derive(Clone)]
pub struct MockExtractor {
    /// Whether health_check should return true
    pub healthy: bool,
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    calls: Arc<AtomicUsize>,
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractor {
    /// Create a new mock extractor (healthy, no responses)
    pub fn new() -> Self {
        Self {
            healthy: true,
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an unhealthy mock extractor
    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    /// Answer `candidate` for documents named `name`
    pub fn with_response(self, name: &str, candidate: BillCandidate) -> Self {
        self.set(name, MockResponse::Candidate(candidate));
        self
    }

    /// Fail for documents named `name`
    pub fn with_failure(self, name: &str, message: &str) -> Self {
        self.set(name, MockResponse::Failure(message.to_string()));
        self
    }

    /// Answer `candidate` after `delay`
    pub fn with_delay(self, name: &str, delay: Duration, candidate: BillCandidate) -> Self {
        self.set(name, MockResponse::Delayed(delay, candidate));
        self
    }

    /// Replace the response for a document after construction
    pub fn set_response(&self, name: &str, candidate: BillCandidate) {
        self.set(name, MockResponse::Candidate(candidate));
    }

    /// Number of `extract` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, name: &str, response: MockResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(name.to_string(), response);
        }
    }
}

#[async_trait]
impl BillExtractor for MockExtractor {
    async fn extract(&self, document: &DocumentRef) -> Result<BillCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let response = self
            .responses
            .lock()
            .map_err(|_| Error::Collaborator("mock extractor lock poisoned".into()))?
            .get(&document.name)
            .cloned();

        match response {
            Some(MockResponse::Candidate(candidate)) => Ok(candidate),
            Some(MockResponse::Failure(message)) => Err(Error::Collaborator(message)),
            Some(MockResponse::Delayed(delay, candidate)) => {
                tokio::time::sleep(delay).await;
                Ok(candidate)
            }
            None => Err(Error::Collaborator(format!(
                "no mock response for {}",
                document.name
            ))),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_responses_and_call_count() {
        let mock = MockExtractor::new()
            .with_response(
                "a.pdf",
                BillCandidate {
                    total_cost: Some(10.0),
                    ..BillCandidate::default()
                },
            )
            .with_failure("b.pdf", "unreadable");

        let handle = mock.clone();
        let a = DocumentRef::from_bytes("a.pdf", vec![1]);
        let b = DocumentRef::from_bytes("b.pdf", vec![2]);
        let c = DocumentRef::from_bytes("c.pdf", vec![3]);

        assert_eq!(mock.extract(&a).await.unwrap().total_cost, Some(10.0));
        assert!(mock.extract(&b).await.is_err());
        assert!(mock.extract(&c).await.is_err());
        assert_eq!(handle.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_health() {
        assert!(MockExtractor::new().health_check().await);
        assert!(!MockExtractor::unhealthy().health_check().await);
    }
}
