//! Storage collaborator seam
//!
//! The listing and select engines only talk to the service through these
//! traits. [`crate::s3::S3Client`] is the production implementation;
//! [`mock::MockObjectStore`] replays scripted responses.

pub mod mock;

use crate::s3::types::{BucketInfo, ListPage, ListRequest, SelectEvent, SelectRequest};
use crate::s3::S3Error;
use async_trait::async_trait;

/// Operations the core consumes from the storage service.
///
/// Implementations own transport concerns (signing, retries, timeouts) and
/// must be safe to share between concurrent callers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every bucket visible to the credential, in server order
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, S3Error>;

    /// Fetch one ListObjectsV2 page. `continuation_token` is `None` for the first page.
    async fn list_objects_page(
        &self,
        request: &ListRequest,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, S3Error>;

    /// Submit a select request and open its event stream.
    ///
    /// Errors here mean the request was rejected before any event was sent.
    async fn select_object_content(
        &self,
        request: &SelectRequest,
    ) -> Result<Box<dyn SelectEventStream>, S3Error>;
}

/// Server-sent select events plus the transport's terminal state.
#[async_trait]
pub trait SelectEventStream: Send {
    /// Next event, or `None` once the stream ended (cleanly or not)
    async fn recv(&mut self) -> Option<SelectEvent>;

    /// Error that ended the stream, if any. Meaningful after `recv` returned `None`.
    fn take_error(&mut self) -> Option<S3Error>;

    /// Release the stream and its connection. Safe to call more than once.
    fn close(&mut self);
}
