//! XML bodies exchanged with the S3 API
//!
//! Parsers use byte-slice tag matching on quick-xml events, the same way for
//! every document: collect the text of the innermost element, then assign it
//! when the element closes.

use crate::s3::client::{Result, S3Error};
use crate::s3::types::{BucketInfo, ListPage, S3Object, ScanProgress, SelectRequest};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Code and message of an S3 `<Error>` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDocument {
    pub code: String,
    pub message: String,
}

fn reader(xml_data: &[u8]) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;
    reader
}

/// Parse a ListObjectsV2 `ListBucketResult` page.
///
/// Text is read untrimmed: keys and prefixes may begin or end with spaces.
/// A `<Contents>` entry without `<Key>` is rejected rather than skipped.
pub fn parse_list_page(xml_data: &[u8]) -> Result<ListPage> {
    let mut reader = Reader::from_reader(xml_data);

    let mut page = ListPage::new();
    let mut current_object: Option<(Option<String>, S3Object)> = None;
    let mut current_text = String::with_capacity(256);
    let mut in_common_prefixes = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                // Whitespace between elements must not leak into an empty leaf
                current_text.clear();
                match e.local_name().as_ref() {
                    b"Contents" => {
                        current_object = Some((None, S3Object::new(String::new(), 0)))
                    }
                    b"CommonPrefixes" => in_common_prefixes = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some((ref mut key, _)) = current_object {
                            *key = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Size" => {
                        if let Some((_, ref mut obj)) = current_object {
                            obj.size = current_text.trim().parse().unwrap_or(0);
                        }
                    }
                    b"LastModified" => {
                        if let Some((_, ref mut obj)) = current_object {
                            obj.last_modified = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"ETag" => {
                        if let Some((_, ref mut obj)) = current_object {
                            obj.etag = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"StorageClass" => {
                        if let Some((_, ref mut obj)) = current_object {
                            obj.storage_class = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Contents" => {
                        if let Some((key, mut obj)) = current_object.take() {
                            obj.key = key.ok_or_else(|| {
                                S3Error::InvalidResponse(
                                    "ListObjectsV2 entry without a Key".to_string(),
                                )
                            })?;
                            page.contents.push(obj);
                        }
                    }
                    b"CommonPrefixes" => in_common_prefixes = false,
                    b"Prefix" if in_common_prefixes => {
                        page.common_prefixes.push(std::mem::take(&mut current_text));
                    }
                    b"IsTruncated" => page.is_truncated = current_text.trim() == "true",
                    b"NextContinuationToken" => {
                        page.next_continuation_token = Some(std::mem::take(&mut current_text));
                    }
                    b"KeyCount" => page.key_count = current_text.trim().parse().ok(),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    Ok(page)
}

/// Parse a `ListAllMyBucketsResult` document.
///
/// Entries are kept in document order. A `<Bucket>` with no `<Name>` element
/// is returned with `name: None`.
pub fn parse_list_buckets(xml_data: &[u8]) -> Result<Vec<BucketInfo>> {
    let mut reader = reader(xml_data);

    let mut buckets = Vec::new();
    let mut current: Option<BucketInfo> = None;
    let mut current_text = String::with_capacity(64);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"Bucket" {
                    current = Some(BucketInfo {
                        name: None,
                        creation_date: None,
                    });
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Bucket" {
                    buckets.push(BucketInfo {
                        name: None,
                        creation_date: None,
                    });
                }
            }
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Name" => {
                        if let Some(ref mut bucket) = current {
                            bucket.name = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"CreationDate" => {
                        if let Some(ref mut bucket) = current {
                            bucket.creation_date = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Bucket" => {
                        if let Some(bucket) = current.take() {
                            buckets.push(bucket);
                        }
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    Ok(buckets)
}

/// Parse an S3 `<Error>` document. Missing fields come back empty.
pub fn parse_error_document(xml_data: &[u8]) -> Result<ErrorDocument> {
    let mut reader = reader(xml_data);
    let mut doc = ErrorDocument::default();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => doc.code = std::mem::take(&mut current_text),
                    b"Message" => doc.message = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    Ok(doc)
}

/// Parse the `<Progress>` or `<Stats>` payload of a select event
pub fn parse_scan_progress(xml_data: &[u8]) -> Result<ScanProgress> {
    let mut reader = reader(xml_data);
    let mut progress = ScanProgress::default();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"BytesScanned" => progress.bytes_scanned = current_text.parse().unwrap_or(0),
                    b"BytesProcessed" => {
                        progress.bytes_processed = current_text.parse().unwrap_or(0)
                    }
                    b"BytesReturned" => progress.bytes_returned = current_text.parse().unwrap_or(0),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::XmlParse(format!("XML parse error: {}", e))),
            _ => {}
        }
    }

    Ok(progress)
}

/// Build the `SelectObjectContentRequest` body.
///
/// Input is JSON `LINES` with the request's compression hint, output is JSON
/// with one record per line.
pub fn build_select_body(request: &SelectRequest) -> String {
    let mut xml = String::with_capacity(512 + request.expression.len());
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<SelectObjectContentRequest xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">");
    xml.push_str("<Expression>");
    xml_escape_into(&mut xml, &request.expression);
    xml.push_str("</Expression><ExpressionType>SQL</ExpressionType>");
    if request.request_progress {
        xml.push_str("<RequestProgress><Enabled>true</Enabled></RequestProgress>");
    }
    xml.push_str("<InputSerialization><CompressionType>");
    xml.push_str(request.compression.as_str());
    xml.push_str("</CompressionType><JSON><Type>LINES</Type></JSON></InputSerialization>");
    xml.push_str("<OutputSerialization><JSON><RecordDelimiter>\n</RecordDelimiter></JSON></OutputSerialization>");
    xml.push_str("</SelectObjectContentRequest>");
    xml
}

/// Escape XML special characters into an existing buffer
fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionType;

    #[test]
    fn test_parse_list_page_with_prefixes_and_token() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>logs</Name>
  <Prefix>2024/</Prefix>
  <KeyCount>3</KeyCount>
  <MaxKeys>3</MaxKeys>
  <Delimiter>/</Delimiter>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents>
    <Key>2024/index.json</Key>
    <LastModified>2024-01-22T20:44:33.219Z</LastModified>
    <ETag>&quot;abc&quot;</ETag>
    <Size>42</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <CommonPrefixes><Prefix>2024/01/</Prefix></CommonPrefixes>
  <CommonPrefixes><Prefix>2024/02/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

        let page = parse_list_page(xml).unwrap();

        assert!(page.is_truncated);
        assert_eq!(
            page.next_continuation_token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
        assert_eq!(page.key_count, Some(3));
        assert_eq!(page.common_prefixes, vec!["2024/01/", "2024/02/"]);
        assert_eq!(page.contents.len(), 1);
        let obj = &page.contents[0];
        assert_eq!(obj.key, "2024/index.json");
        assert_eq!(obj.size, 42);
        assert_eq!(obj.etag.as_deref(), Some("\"abc\""));
        assert_eq!(obj.storage_class.as_deref(), Some("STANDARD"));
    }

    #[test]
    fn test_parse_list_page_keeps_edge_whitespace() {
        let xml = br#"<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>report.json </Key>
    <Size>1</Size>
  </Contents>
  <Contents>
    <Key>  lead.json</Key>
    <Size>2</Size>
  </Contents>
  <Contents>
    <Key></Key>
    <Size>3</Size>
  </Contents>
  <CommonPrefixes><Prefix>dir /x </Prefix></CommonPrefixes>
</ListBucketResult>"#;

        let page = parse_list_page(xml).unwrap();

        let keys: Vec<&str> = page.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["report.json ", "  lead.json", ""]);
        assert_eq!(page.common_prefixes, vec!["dir /x "]);
        assert_eq!(page.contents[1].size, 2);
    }

    #[test]
    fn test_parse_empty_list_page() {
        let xml = br#"<ListBucketResult><Name>b</Name><Prefix>none/</Prefix><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_page(xml).unwrap();

        assert!(!page.is_truncated);
        assert!(page.contents.is_empty());
        assert!(page.common_prefixes.is_empty());
        assert_eq!(page.next_continuation_token, None);
    }

    #[test]
    fn test_parse_list_page_rejects_keyless_entry() {
        let xml = br#"<ListBucketResult><Contents><Size>1</Size></Contents></ListBucketResult>"#;
        let err = parse_list_page(xml).unwrap_err();
        assert!(matches!(err, S3Error::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_list_buckets_keeps_nameless_entries() {
        let xml = br#"<ListAllMyBucketsResult>
  <Owner><ID>owner</ID><DisplayName>me</DisplayName></Owner>
  <Buckets>
    <Bucket><Name>alpha</Name><CreationDate>2024-01-01T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><CreationDate>2024-01-02T00:00:00.000Z</CreationDate></Bucket>
    <Bucket><Name>gamma</Name></Bucket>
  </Buckets>
</ListAllMyBucketsResult>"#;

        let buckets = parse_list_buckets(xml).unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].name.as_deref(), Some("alpha"));
        assert_eq!(buckets[0].creation_date.as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(buckets[1].name, None);
        assert_eq!(buckets[2].name.as_deref(), Some("gamma"));
    }

    #[test]
    fn test_parse_error_document() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message><RequestId>4442587FB7D0A2F9</RequestId></Error>"#;

        let doc = parse_error_document(xml).unwrap();
        assert_eq!(doc.code, "NoSuchKey");
        assert_eq!(doc.message, "The specified key does not exist.");
    }

    #[test]
    fn test_parse_scan_progress() {
        let xml = br#"<Stats><BytesScanned>512</BytesScanned><BytesProcessed>1024</BytesProcessed><BytesReturned>64</BytesReturned></Stats>"#;
        let stats = parse_scan_progress(xml).unwrap();

        assert_eq!(
            stats,
            ScanProgress {
                bytes_scanned: 512,
                bytes_processed: 1024,
                bytes_returned: 64,
            }
        );
    }

    #[test]
    fn test_build_select_body() {
        let request = SelectRequest::json_lines(
            "bucket",
            "events.jsonl.bz2",
            "SELECT * FROM S3Object s WHERE s.level = 'error' AND s.n < 3",
        );
        let body = build_select_body(&request);

        assert!(body.contains(
            "<Expression>SELECT * FROM S3Object s WHERE s.level = &apos;error&apos; AND s.n &lt; 3</Expression>"
        ));
        assert!(body.contains("<ExpressionType>SQL</ExpressionType>"));
        assert!(body.contains("<RequestProgress><Enabled>true</Enabled></RequestProgress>"));
        assert!(body.contains("<CompressionType>BZIP2</CompressionType>"));
        assert!(body.contains("<JSON><Type>LINES</Type></JSON>"));
        assert!(body.contains("<OutputSerialization><JSON>"));
    }

    #[test]
    fn test_build_select_body_without_progress() {
        let mut request = SelectRequest::json_lines("b", "k.json", "SELECT 1")
            .with_compression(CompressionType::None);
        request.request_progress = false;

        let body = build_select_body(&request);
        assert!(!body.contains("RequestProgress"));
        assert!(body.contains("<CompressionType>NONE</CompressionType>"));
    }
}
