//! AWS event-stream framing for SelectObjectContent responses
//!
//! Each message on the wire is laid out as:
//!
//! ```text
//! [total_len u32][headers_len u32][prelude_crc u32][headers][payload][message_crc u32]
//! ```
//!
//! All integers are big-endian. `prelude_crc` covers the first 8 bytes and
//! `message_crc` covers everything before it. Both are CRC32 (IEEE).

use crate::s3::client::{Result, S3Error};
use crate::s3::types::SelectEvent;
use crate::s3::xml::parse_scan_progress;
use crate::store::SelectEventStream;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Body;
use std::fmt::Display;
use tracing::{debug, trace};

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Typed header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    ByteArray(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: HeaderValue,
}

/// One decoded event-stream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<Header>,
    pub payload: Bytes,
}

impl Frame {
    /// Value of a string header, if present
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|h| match &h.value {
            HeaderValue::String(s) if h.name == name => Some(s.as_str()),
            _ => None,
        })
    }

    /// Interpret the frame as a select event.
    ///
    /// Returns `Ok(None)` for event types this client does not know about.
    /// Error and exception messages become [`S3Error::Stream`].
    pub fn into_event(self) -> Result<Option<SelectEvent>> {
        let message_type = self.header_str(":message-type").map(str::to_owned);

        match message_type.as_deref() {
            Some("event") => {
                let event_type = self.header_str(":event-type").map(str::to_owned);
                let event = match event_type.as_deref() {
                    Some("Records") => SelectEvent::Records(self.payload),
                    Some("Progress") => SelectEvent::Progress(parse_scan_progress(&self.payload)?),
                    Some("Stats") => SelectEvent::Stats(parse_scan_progress(&self.payload)?),
                    Some("Cont") => SelectEvent::Continuation,
                    Some("End") => SelectEvent::End,
                    other => {
                        debug!(event_type = ?other, "skipping unknown select event");
                        return Ok(None);
                    }
                };
                Ok(Some(event))
            }
            Some("error") => Err(S3Error::Stream {
                code: self.header_str(":error-code").unwrap_or("Unknown").to_string(),
                message: self.header_str(":error-message").unwrap_or_default().to_string(),
            }),
            Some("exception") => Err(S3Error::Stream {
                code: self.header_str(":exception-type").unwrap_or("Unknown").to_string(),
                message: String::from_utf8_lossy(&self.payload).into_owned(),
            }),
            other => Err(S3Error::EventStream(format!(
                "unexpected message type {:?}",
                other
            ))),
        }
    }
}

/// Incremental decoder: feed body chunks, take complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the response body
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, or `Ok(None)` if more bytes are needed
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let mut prelude = &self.buf[..PRELUDE_LEN];
        let total_len = prelude.get_u32() as usize;
        let headers_len = prelude.get_u32() as usize;
        let prelude_crc = prelude.get_u32();

        if crc32fast::hash(&self.buf[..8]) != prelude_crc {
            return Err(S3Error::EventStream("prelude checksum mismatch".to_string()));
        }
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len) {
            return Err(S3Error::EventStream(format!(
                "invalid message length {}",
                total_len
            )));
        }
        if headers_len > total_len - MIN_MESSAGE_LEN {
            return Err(S3Error::EventStream(format!(
                "headers length {} exceeds message length {}",
                headers_len, total_len
            )));
        }

        if self.buf.len() < total_len {
            return Ok(None);
        }

        let message = self.buf.split_to(total_len).freeze();
        let body_end = total_len - CRC_LEN;
        let message_crc = (&message[body_end..]).get_u32();
        if crc32fast::hash(&message[..body_end]) != message_crc {
            return Err(S3Error::EventStream("message checksum mismatch".to_string()));
        }

        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(message.slice(PRELUDE_LEN..headers_end))?;
        let payload = message.slice(headers_end..body_end);

        Ok(Some(Frame { headers, payload }))
    }
}

fn ensure(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(S3Error::EventStream("truncated header block".to_string()));
    }
    Ok(())
}

fn parse_headers(mut buf: Bytes) -> Result<Vec<Header>> {
    let mut headers = Vec::new();

    while buf.has_remaining() {
        let name_len = buf.get_u8() as usize;
        ensure(&buf, name_len)?;
        let name = String::from_utf8(buf.split_to(name_len).to_vec())
            .map_err(|e| S3Error::EventStream(format!("header name is not UTF-8: {}", e)))?;

        ensure(&buf, 1)?;
        let value = match buf.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                ensure(&buf, 1)?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                ensure(&buf, 2)?;
                HeaderValue::Int16(buf.get_i16())
            }
            4 => {
                ensure(&buf, 4)?;
                HeaderValue::Int32(buf.get_i32())
            }
            5 => {
                ensure(&buf, 8)?;
                HeaderValue::Int64(buf.get_i64())
            }
            6 => {
                ensure(&buf, 2)?;
                let len = buf.get_u16() as usize;
                ensure(&buf, len)?;
                HeaderValue::ByteArray(buf.split_to(len))
            }
            7 => {
                ensure(&buf, 2)?;
                let len = buf.get_u16() as usize;
                ensure(&buf, len)?;
                let value = String::from_utf8(buf.split_to(len).to_vec()).map_err(|e| {
                    S3Error::EventStream(format!("header {} is not UTF-8: {}", name, e))
                })?;
                HeaderValue::String(value)
            }
            8 => {
                ensure(&buf, 8)?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                ensure(&buf, 16)?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(S3Error::EventStream(format!(
                    "unknown header value type {}",
                    other
                )))
            }
        };

        headers.push(Header { name, value });
    }

    Ok(headers)
}

/// Encode a message with string headers.
///
/// The service never expects frames from the client on this API; this is
/// the inverse of [`FrameDecoder`] for fixtures and local test servers.
/// Header names over 255 bytes, values over 65535 bytes and messages over
/// 16 MiB cannot be represented and are rejected.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Result<Bytes> {
    let mut header_block = BytesMut::new();
    for (name, value) in headers {
        let name_len = u8::try_from(name.len()).map_err(|_| {
            S3Error::EventStream(format!("header name is {} bytes, max 255", name.len()))
        })?;
        let value_len = u16::try_from(value.len()).map_err(|_| {
            S3Error::EventStream(format!(
                "header '{}' value is {} bytes, max 65535",
                name,
                value.len()
            ))
        })?;
        header_block.put_u8(name_len);
        header_block.put_slice(name.as_bytes());
        header_block.put_u8(7);
        header_block.put_u16(value_len);
        header_block.put_slice(value.as_bytes());
    }

    let total_len = MIN_MESSAGE_LEN + header_block.len() + payload.len();
    if total_len > MAX_MESSAGE_LEN {
        return Err(S3Error::EventStream(format!(
            "message of {} bytes exceeds {} bytes",
            total_len, MAX_MESSAGE_LEN
        )));
    }
    let mut out = BytesMut::with_capacity(total_len);
    out.put_u32(total_len as u32);
    out.put_u32(header_block.len() as u32);
    let prelude_crc = crc32fast::hash(&out[..8]);
    out.put_u32(prelude_crc);
    out.put_slice(&header_block);
    out.put_slice(payload);
    let message_crc = crc32fast::hash(&out);
    out.put_u32(message_crc);
    Ok(out.freeze())
}

/// Encode a `:message-type = event` frame of the given event type
pub fn encode_event(event_type: &str, payload: &[u8]) -> Result<Bytes> {
    encode_frame(
        &[
            (":message-type", "event"),
            (":event-type", event_type),
            (":content-type", "application/octet-stream"),
        ],
        payload,
    )
}

/// Select event stream read from an HTTP response body.
///
/// Frames are decoded as body chunks arrive. The first transport, framing or
/// service error is recorded and ends the stream; `close` drops the body,
/// which releases the underlying connection.
pub struct HttpEventStream<B> {
    body: Option<B>,
    decoder: FrameDecoder,
    error: Option<S3Error>,
    finished: bool,
}

impl<B> HttpEventStream<B> {
    pub fn new(body: B) -> Self {
        Self {
            body: Some(body),
            decoder: FrameDecoder::new(),
            error: None,
            finished: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.body.is_none()
    }

    fn fail(&mut self, err: S3Error) {
        debug!(error = %err, "select stream failed");
        self.error = Some(err);
        self.finished = true;
        self.body = None;
    }
}

#[async_trait]
impl<B> SelectEventStream for HttpEventStream<B>
where
    B: Body<Data = Bytes> + Send + Unpin,
    B::Error: Display,
{
    async fn recv(&mut self) -> Option<SelectEvent> {
        loop {
            if self.finished {
                return None;
            }

            match self.decoder.decode() {
                Ok(Some(frame)) => match frame.into_event() {
                    Ok(Some(event)) => {
                        trace!(event = event.kind(), "select event");
                        return Some(event);
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        self.fail(e);
                        return None;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    self.fail(e);
                    return None;
                }
            }

            let Some(body) = self.body.as_mut() else {
                self.finished = true;
                return None;
            };

            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        self.decoder.extend(data);
                    }
                }
                Some(Err(e)) => {
                    self.fail(S3Error::InvalidResponse(format!("Body error: {}", e)));
                    return None;
                }
                None => {
                    let buffered = self.decoder.buffered();
                    if buffered > 0 {
                        self.fail(S3Error::EventStream(format!(
                            "stream ended inside a frame ({} bytes buffered)",
                            buffered
                        )));
                    } else {
                        self.finished = true;
                        self.body = None;
                    }
                    return None;
                }
            }
        }
    }

    fn take_error(&mut self) -> Option<S3Error> {
        self.error.take()
    }

    fn close(&mut self) {
        self.finished = true;
        self.body = None;
    }
}
