//! Scripted in-memory [`ObjectStore`] for tests and local experiments
//!
//! Responses are queued up front and replayed in order. Every request is
//! recorded so callers can assert on cursors and parameters.

use super::{ObjectStore, SelectEventStream};
use crate::s3::types::{BucketInfo, ListPage, ListRequest, SelectEvent, SelectRequest};
use crate::s3::S3Error;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A list call as received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCall {
    pub request: ListRequest,
    pub continuation_token: Option<String>,
}

enum ScriptedSelect {
    Rejected(S3Error),
    Stream {
        events: Vec<SelectEvent>,
        error: Option<S3Error>,
        hang: bool,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MockObjectStore {
    buckets: Vec<BucketInfo>,
    bucket_error: Mutex<Option<S3Error>>,
    pages: Mutex<VecDeque<Result<ListPage, S3Error>>>,
    list_calls: Mutex<Vec<ListCall>>,
    selects: Mutex<VecDeque<ScriptedSelect>>,
    select_calls: Mutex<Vec<SelectRequest>>,
    closes: Arc<AtomicUsize>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buckets returned by `list_buckets`
    pub fn with_buckets(mut self, buckets: Vec<BucketInfo>) -> Self {
        self.buckets = buckets;
        self
    }

    /// Make the next `list_buckets` call fail
    pub fn with_bucket_error(self, err: S3Error) -> Self {
        *lock(&self.bucket_error) = Some(err);
        self
    }

    /// Queue a listing page. Once the queue is empty, an empty final page is served.
    pub fn with_page(self, page: ListPage) -> Self {
        lock(&self.pages).push_back(Ok(page));
        self
    }

    /// Queue a failing page fetch
    pub fn with_page_error(self, err: S3Error) -> Self {
        lock(&self.pages).push_back(Err(err));
        self
    }

    /// Queue a select whose stream delivers `events` and then closes cleanly
    pub fn with_select(self, events: Vec<SelectEvent>) -> Self {
        lock(&self.selects).push_back(ScriptedSelect::Stream {
            events,
            error: None,
            hang: false,
        });
        self
    }

    /// Queue a select whose stream delivers `events` and then reports `err`
    pub fn with_select_failure(self, events: Vec<SelectEvent>, err: S3Error) -> Self {
        lock(&self.selects).push_back(ScriptedSelect::Stream {
            events,
            error: Some(err),
            hang: false,
        });
        self
    }

    /// Queue a select whose stream delivers `events` and then never ends
    pub fn with_hanging_select(self, events: Vec<SelectEvent>) -> Self {
        lock(&self.selects).push_back(ScriptedSelect::Stream {
            events,
            error: None,
            hang: true,
        });
        self
    }

    /// Queue a select rejected before any event is sent
    pub fn with_select_rejection(self, err: S3Error) -> Self {
        lock(&self.selects).push_back(ScriptedSelect::Rejected(err));
        self
    }

    pub fn list_calls(&self) -> Vec<ListCall> {
        lock(&self.list_calls).clone()
    }

    pub fn select_calls(&self) -> Vec<SelectRequest> {
        lock(&self.select_calls).clone()
    }

    /// Number of `close` invocations across all streams opened by this mock
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, S3Error> {
        if let Some(err) = lock(&self.bucket_error).take() {
            return Err(err);
        }
        Ok(self.buckets.clone())
    }

    async fn list_objects_page(
        &self,
        request: &ListRequest,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, S3Error> {
        lock(&self.list_calls).push(ListCall {
            request: request.clone(),
            continuation_token: continuation_token.map(str::to_owned),
        });
        lock(&self.pages).pop_front().unwrap_or_else(|| Ok(ListPage::new()))
    }

    async fn select_object_content(
        &self,
        request: &SelectRequest,
    ) -> Result<Box<dyn SelectEventStream>, S3Error> {
        lock(&self.select_calls).push(request.clone());

        match lock(&self.selects).pop_front() {
            Some(ScriptedSelect::Rejected(err)) => Err(err),
            Some(ScriptedSelect::Stream { events, error, hang }) => Ok(Box::new(MockEventStream {
                events: events.into(),
                error,
                hang,
                closes: Arc::clone(&self.closes),
            })),
            None => Err(S3Error::InvalidResponse(
                "no scripted select response".to_string(),
            )),
        }
    }
}

/// Stream handed out by [`MockObjectStore::select_object_content`]
pub struct MockEventStream {
    events: VecDeque<SelectEvent>,
    error: Option<S3Error>,
    hang: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SelectEventStream for MockEventStream {
    async fn recv(&mut self) -> Option<SelectEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        None
    }

    fn take_error(&mut self) -> Option<S3Error> {
        self.error.take()
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pages_replay_in_order_then_end() {
        let store = MockObjectStore::new()
            .with_page(ListPage::with_keys(["a"]).continued_by("t1"))
            .with_page(ListPage::with_keys(["b"]));
        let request = ListRequest::flat("bucket", "");

        let first = store.list_objects_page(&request, None).await.unwrap();
        let second = store.list_objects_page(&request, Some("t1")).await.unwrap();
        let extra = store.list_objects_page(&request, None).await.unwrap();

        assert_eq!(first.contents[0].key, "a");
        assert_eq!(second.contents[0].key, "b");
        assert!(extra.contents.is_empty());

        let calls = store.list_calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].continuation_token.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_bucket_error_is_one_shot() {
        let store = MockObjectStore::new()
            .with_buckets(vec![BucketInfo::named("a")])
            .with_bucket_error(S3Error::InvalidResponse("down".to_string()));

        assert!(store.list_buckets().await.is_err());
        assert_eq!(store.list_buckets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_select_stream_counts_closes() {
        let store = MockObjectStore::new().with_select(vec![SelectEvent::End]);
        let request = SelectRequest::json_lines("b", "k.json", "SELECT 1");

        let mut stream = store.select_object_content(&request).await.unwrap();
        assert_eq!(stream.recv().await, Some(SelectEvent::End));
        assert_eq!(stream.recv().await, None);
        stream.close();

        assert_eq!(store.close_count(), 1);
        assert_eq!(store.select_calls(), vec![request]);
    }

    #[tokio::test]
    async fn test_unscripted_select_is_rejected() {
        let store = MockObjectStore::new();
        let request = SelectRequest::json_lines("b", "k.json", "SELECT 1");
        assert!(store.select_object_content(&request).await.is_err());
    }
}
