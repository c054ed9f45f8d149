//! s3sift - S3 bucket and key listing with streaming S3 Select

pub mod cli;
pub mod compression;
pub mod config;
pub mod core;
pub mod error;
pub mod listing;
pub mod s3;
pub mod select;
pub mod store;

pub use compression::{infer_compression, CompressionType};
pub use config::Config;
pub use core::Core;
pub use error::{Error, Result};
pub use select::SelectSummary;
