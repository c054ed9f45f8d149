//! S3 request and response structures

use crate::compression::CompressionType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Delimiter used for the hierarchical ("directory") view
pub const DIRECTORY_DELIMITER: &str = "/";

/// S3 Object metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Object {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
    /// ETag (optional)
    pub etag: Option<String>,
    /// Storage class (STANDARD, STANDARD_IA, GLACIER, etc.)
    pub storage_class: Option<String>,
}

impl S3Object {
    /// Create a new S3Object
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
            etag: None,
            storage_class: None,
        }
    }
}

/// Bucket entry as returned by ListBuckets.
///
/// `name` stays optional here so that a malformed entry reaches the lister,
/// which rejects it instead of silently dropping it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: Option<String>,
    pub creation_date: Option<String>,
}

impl BucketInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            creation_date: None,
        }
    }
}

/// Parameters of one ListObjectsV2 listing.
///
/// A delimiter selects the hierarchical view (common prefixes only);
/// without one the listing returns every key under the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    /// Page size hint; `None` lets the server decide (1000 on AWS)
    pub max_keys: Option<i32>,
}

impl ListRequest {
    /// Flat listing: full object keys
    pub fn flat(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            delimiter: None,
            max_keys: None,
        }
    }

    /// Hierarchical listing: common prefixes under `/`
    pub fn hierarchical(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            delimiter: Some(DIRECTORY_DELIMITER.to_string()),
            ..Self::flat(bucket, prefix)
        }
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn is_hierarchical(&self) -> bool {
        self.delimiter.is_some()
    }
}

/// One page of a ListObjectsV2 response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    /// Objects in this page
    pub contents: Vec<S3Object>,
    /// Common prefixes (subdirectories when using delimiter)
    pub common_prefixes: Vec<String>,
    /// Whether more pages follow
    pub is_truncated: bool,
    /// Cursor for the next request
    pub next_continuation_token: Option<String>,
    /// Key count reported by the server for this page
    pub key_count: Option<i32>,
}

impl ListPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final page carrying the given keys
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            contents: keys.into_iter().map(|k| S3Object::new(k, 0)).collect(),
            ..Self::default()
        }
    }

    /// Final page carrying the given common prefixes
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            common_prefixes: prefixes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Mark the page as truncated, pointing at the next cursor
    pub fn continued_by(mut self, token: impl Into<String>) -> Self {
        self.is_truncated = true;
        self.next_continuation_token = Some(token.into());
        self
    }

    /// Items relevant for the request's view, in server order
    pub fn into_entries(self, hierarchical: bool) -> Vec<String> {
        if hierarchical {
            self.common_prefixes
        } else {
            self.contents.into_iter().map(|o| o.key).collect()
        }
    }
}

/// Parameters of a SelectObjectContent call.
///
/// Input is always newline-delimited JSON and output is JSON records,
/// one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    pub bucket: String,
    pub key: String,
    /// SQL expression evaluated by the service
    pub expression: String,
    /// Must match the object's real encoding or the service rejects the call
    pub compression: CompressionType,
    /// Ask the service to interleave Progress events
    pub request_progress: bool,
}

impl SelectRequest {
    /// JSON Lines request with the compression hint inferred from the key
    pub fn json_lines(
        bucket: impl Into<String>,
        key: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self {
            bucket: bucket.into(),
            compression: CompressionType::from_key(&key),
            key,
            expression: expression.into(),
            request_progress: true,
        }
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }
}

/// Byte counters carried by Progress and Stats events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub bytes_scanned: u64,
    pub bytes_processed: u64,
    pub bytes_returned: u64,
}

/// Events of a select response stream.
///
/// Only `Records` carries output. The others are metadata and produce nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectEvent {
    /// A chunk of matching records (may be empty)
    Records(Bytes),
    /// Periodic scan progress (only when progress was requested)
    Progress(ScanProgress),
    /// Final scan statistics
    Stats(ScanProgress),
    /// Keep-alive sent while the service is still scanning
    Continuation,
    /// The service finished sending results
    End,
}

impl SelectEvent {
    /// Records event from any byte source
    pub fn records(payload: impl Into<Bytes>) -> Self {
        SelectEvent::Records(payload.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SelectEvent::Records(_) => "Records",
            SelectEvent::Progress(_) => "Progress",
            SelectEvent::Stats(_) => "Stats",
            SelectEvent::Continuation => "Cont",
            SelectEvent::End => "End",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_request_modes() {
        let flat = ListRequest::flat("bucket", "logs/");
        assert!(!flat.is_hierarchical());
        assert_eq!(flat.delimiter, None);

        let dirs = ListRequest::hierarchical("bucket", "logs/").with_max_keys(10);
        assert!(dirs.is_hierarchical());
        assert_eq!(dirs.delimiter.as_deref(), Some("/"));
        assert_eq!(dirs.max_keys, Some(10));
        assert_eq!(dirs.prefix, "logs/");
    }

    #[test]
    fn test_page_entries_follow_view() {
        let mut page = ListPage::with_keys(["a/1.json", "a/2.json"]);
        page.common_prefixes.push("a/sub/".to_string());

        assert_eq!(page.clone().into_entries(false), vec!["a/1.json", "a/2.json"]);
        assert_eq!(page.into_entries(true), vec!["a/sub/"]);
    }

    #[test]
    fn test_continued_page() {
        let page = ListPage::with_prefixes(["x/"]).continued_by("tok-1");
        assert!(page.is_truncated);
        assert_eq!(page.next_continuation_token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_select_request_infers_compression() {
        let req = SelectRequest::json_lines("b", "data/events.jsonl.gz", "SELECT * FROM S3Object s");
        assert_eq!(req.compression, CompressionType::Gzip);
        assert!(req.request_progress);

        let req = SelectRequest::json_lines("b", "data/events.jsonl", "SELECT 1")
            .with_compression(CompressionType::Bzip2);
        assert_eq!(req.compression, CompressionType::Bzip2);
    }

    #[test]
    fn test_event_kind() {
        assert_eq!(SelectEvent::records("x").kind(), "Records");
        assert_eq!(SelectEvent::Continuation.kind(), "Cont");
        assert_eq!(SelectEvent::Stats(ScanProgress::default()).kind(), "Stats");
    }
}
