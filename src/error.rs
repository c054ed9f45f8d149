//! Error taxonomy for listing and select operations

use crate::s3::S3Error;
use thiserror::Error;

/// Errors surfaced to callers of the listing and select operations.
///
/// Nothing here is retried. Resilience belongs to the transport (`S3Client`)
/// or to the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Handle construction failed (credentials, region, endpoint, TLS)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bucket list, listing page or select submission failed
    #[error("Request failed: {0}")]
    Request(#[source] S3Error),

    /// The select event stream failed mid-drain or at the final check
    #[error("Select stream failed: {0}")]
    Stream(#[source] S3Error),

    /// Writing select output to the caller's sink failed
    #[error("Output write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a configuration error from an anyhow chain, keeping every cause
    pub fn config(err: anyhow::Error) -> Self {
        Error::Config(format!("{:#}", err))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Error::Request(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Error::Stream(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
