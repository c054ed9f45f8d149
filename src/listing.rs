//! Bucket and key listing
//!
//! Key listings walk ListObjectsV2 pages with a continuation cursor. The
//! collectors are all-or-nothing: one failed page fails the whole listing and
//! nothing gathered before it is returned.

use crate::error::{Error, Result};
use crate::s3::types::{ListPage, ListRequest};
use crate::s3::S3Error;
use crate::store::ObjectStore;
use async_stream::try_stream;
use futures::{pin_mut, Stream, TryStreamExt};
use tracing::debug;

/// Names of every bucket visible to the credential, in server order.
///
/// A bucket entry without a name fails the call.
pub async fn list_buckets(store: &dyn ObjectStore) -> Result<Vec<String>> {
    let buckets = store.list_buckets().await.map_err(Error::Request)?;
    debug!(count = buckets.len(), "listed buckets");

    buckets
        .into_iter()
        .enumerate()
        .map(|(index, bucket)| {
            bucket.name.ok_or_else(|| {
                Error::Request(S3Error::InvalidResponse(format!(
                    "bucket entry {} has no name",
                    index
                )))
            })
        })
        .collect()
}

/// Common prefixes directly under `prefix`, using `/` as the delimiter
pub async fn list_directories(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>> {
    list_entries(store, ListRequest::hierarchical(bucket, prefix)).await
}

/// Every key under `prefix`, with no delimiter
pub async fn list_keys(store: &dyn ObjectStore, bucket: &str, prefix: &str) -> Result<Vec<String>> {
    list_entries(store, ListRequest::flat(bucket, prefix)).await
}

/// Lazy stream of listing pages in server order.
///
/// The first request carries no cursor. Each later request carries the token
/// of the page before it. The stream ends after the first page that is not
/// truncated.
///
/// # Example
///
/// ```ignore
/// use futures::{pin_mut, TryStreamExt};
///
/// let stream = pages(&store, ListRequest::flat("my-bucket", "logs/"));
/// pin_mut!(stream);
///
/// while let Some(page) = stream.try_next().await? {
///     for object in &page.contents {
///         println!("{} ({} bytes)", object.key, object.size);
///     }
/// }
/// ```
pub fn pages<'a>(
    store: &'a dyn ObjectStore,
    request: ListRequest,
) -> impl Stream<Item = Result<ListPage>> + Send + 'a {
    try_stream! {
        let mut continuation_token: Option<String> = None;
        let mut page_number = 0usize;

        loop {
            page_number += 1;
            let page = store
                .list_objects_page(&request, continuation_token.as_deref())
                .await
                .map_err(Error::Request)?;

            debug!(
                bucket = %request.bucket,
                prefix = %request.prefix,
                page = page_number,
                keys = page.contents.len(),
                prefixes = page.common_prefixes.len(),
                truncated = page.is_truncated,
                "fetched listing page"
            );

            let next_token = next_cursor(&page, page_number)?;
            yield page;

            match next_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
    }
}

/// Cursor for the request after `page`. `IsTruncated` decides whether there is one.
fn next_cursor(page: &ListPage, page_number: usize) -> Result<Option<String>> {
    if !page.is_truncated {
        return Ok(None);
    }
    match page.next_continuation_token.as_deref() {
        Some(token) if !token.is_empty() => Ok(Some(token.to_string())),
        _ => Err(Error::Request(S3Error::InvalidResponse(format!(
            "listing page {} is truncated but has no continuation token",
            page_number
        )))),
    }
}

/// Entries of every page of `request`: common prefixes when it has a
/// delimiter, keys otherwise. `max_keys` only bounds the size of each page.
pub async fn list_entries(store: &dyn ObjectStore, request: ListRequest) -> Result<Vec<String>> {
    let hierarchical = request.is_hierarchical();
    let stream = pages(store, request);
    pin_mut!(stream);

    let mut entries = Vec::new();
    while let Some(page) = stream.try_next().await? {
        entries.extend(page.into_entries(hierarchical));
    }
    Ok(entries)
}
