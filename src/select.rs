//! Streaming S3 Select consumer
//!
//! A select call moves through `Open -> Draining -> Closed`. A rejected
//! submission fails with [`Error::Request`] before any payload is produced.
//! Once draining, record payloads are handed out as they arrive. An error
//! recorded by the stream is checked after the last event and fails the call
//! with [`Error::Stream`], even when payloads were already emitted.

use crate::error::{Error, Result};
use crate::s3::types::{SelectEvent, SelectRequest};
use crate::s3::S3Error;
use crate::store::{ObjectStore, SelectEventStream};
use async_stream::try_stream;
use bytes::Bytes;
use futures::{pin_mut, Stream, TryStreamExt};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

/// Totals of a drained select
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectSummary {
    /// Non-empty record payloads written
    pub chunks: u64,
    pub bytes_written: u64,
}

/// Owns an open select stream and closes it exactly once.
///
/// `finish` closes it on the normal path. Dropping the guard closes it on
/// every other path: errors, early abandonment and cancellation.
pub struct StreamGuard {
    stream: Option<Box<dyn SelectEventStream>>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn SelectEventStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    /// Next event, or `None` once the stream ended or was closed
    pub async fn recv(&mut self) -> Option<SelectEvent> {
        match self.stream.as_mut() {
            Some(stream) => stream.recv().await,
            None => None,
        }
    }

    /// Close the stream and report the error it ended with, if any
    pub fn finish(mut self) -> std::result::Result<(), S3Error> {
        let error = self.stream.as_mut().and_then(|stream| stream.take_error());
        self.close();
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.is_open() {
            debug!("select stream released before completion");
            self.close();
        }
    }
}

/// Run a select and stream its record payloads.
///
/// The stream is lazy: nothing is sent until it is first polled. It is
/// finite and cannot be restarted. Empty record payloads are skipped.
pub fn run_select(
    store: Arc<dyn ObjectStore>,
    request: SelectRequest,
) -> impl Stream<Item = Result<Bytes>> + Send {
    try_stream! {
        debug!(
            bucket = %request.bucket,
            key = %request.key,
            compression = %request.compression,
            "submitting select"
        );
        let stream = store
            .select_object_content(&request)
            .await
            .map_err(Error::Request)?;
        let mut guard = StreamGuard::new(stream);
        let mut chunks = 0u64;

        while let Some(event) = guard.recv().await {
            match event {
                SelectEvent::Records(payload) => {
                    if payload.is_empty() {
                        continue;
                    }
                    chunks += 1;
                    yield payload;
                }
                SelectEvent::Progress(progress) => {
                    debug!(
                        bytes_scanned = progress.bytes_scanned,
                        bytes_processed = progress.bytes_processed,
                        bytes_returned = progress.bytes_returned,
                        "select progress"
                    );
                }
                SelectEvent::Stats(stats) => {
                    info!(
                        bytes_scanned = stats.bytes_scanned,
                        bytes_processed = stats.bytes_processed,
                        bytes_returned = stats.bytes_returned,
                        "select stats"
                    );
                }
                SelectEvent::Continuation => trace!("select keep-alive"),
                SelectEvent::End => debug!("select end event"),
            }
        }

        guard.finish().map_err(Error::Stream)?;
        debug!(key = %request.key, chunks, "select stream drained");
    }
}

/// Run a select and write each record payload to `writer` as it arrives.
///
/// A failed write stops the drain and releases the stream.
pub async fn select_to_writer<W>(
    store: Arc<dyn ObjectStore>,
    request: SelectRequest,
    writer: &mut W,
) -> Result<SelectSummary>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let stream = run_select(store, request);
    pin_mut!(stream);

    let mut summary = SelectSummary::default();
    while let Some(payload) = stream.try_next().await? {
        writer.write_all(&payload).await?;
        writer.flush().await?;
        summary.chunks += 1;
        summary.bytes_written += payload.len() as u64;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::types::ScanProgress;
    use crate::store::mock::MockObjectStore;
    use futures::StreamExt;

    fn request() -> SelectRequest {
        SelectRequest::json_lines("bucket", "events.json", "SELECT * FROM S3Object s")
    }

    #[tokio::test]
    async fn test_metadata_events_produce_nothing() {
        let store = Arc::new(MockObjectStore::new().with_select(vec![
            SelectEvent::Progress(ScanProgress::default()),
            SelectEvent::Continuation,
            SelectEvent::records("{\"a\":1}\n"),
            SelectEvent::Stats(ScanProgress {
                bytes_scanned: 10,
                bytes_processed: 10,
                bytes_returned: 8,
            }),
            SelectEvent::End,
        ]));

        let payloads: Vec<Bytes> = run_select(store.clone(), request())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(payloads, vec![Bytes::from("{\"a\":1}\n")]);
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let store = Arc::new(MockObjectStore::new().with_select(vec![SelectEvent::End]));
        let stream = run_select(store.clone(), request());
        assert!(store.select_calls().is_empty());

        drop(stream);
        assert!(store.select_calls().is_empty());
        assert_eq!(store.close_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_submission_never_opens() {
        let store = Arc::new(
            MockObjectStore::new()
                .with_select_rejection(S3Error::InvalidResponse("NoSuchKey".to_string())),
        );

        let mut stream = Box::pin(run_select(store.clone(), request()));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_request());
        assert!(stream.next().await.is_none());
        assert_eq!(store.close_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_closes_once() {
        let store = MockObjectStore::new().with_select(vec![]);
        let stream = store.select_object_content(&request()).await.unwrap();

        let guard = StreamGuard::new(stream);
        assert!(guard.is_open());
        guard.finish().unwrap();
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_guard_drop_closes() {
        let store = MockObjectStore::new().with_select(vec![SelectEvent::End]);
        let stream = store.select_object_content(&request()).await.unwrap();

        drop(StreamGuard::new(stream));
        assert_eq!(store.close_count(), 1);
    }
}
