//! S3 transport
//!
//! This module provides:
//! - AWS Signature Version 4 signing
//! - ListBuckets, ListObjectsV2 and SelectObjectContent over hyper
//! - XML and event-stream codecs for the response bodies

pub mod client;
pub mod eventstream;
pub mod signer;
pub mod types;
pub mod xml;

pub use client::{Result, S3Client, S3Error};
pub use signer::{Credentials, RequestSigner};
pub use types::{
    BucketInfo, ListPage, ListRequest, S3Object, ScanProgress, SelectEvent, SelectRequest,
};
