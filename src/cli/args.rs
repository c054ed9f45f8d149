use crate::compression::CompressionType;
use clap::{Parser, Subcommand};

/// s3sift - list S3 buckets and keys, filter objects with S3 Select
#[derive(Parser, Debug)]
#[command(name = "s3sift")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (YAML). Credentials come from the environment otherwise.
    #[arg(long, global = true, env = "S3SIFT_CONFIG")]
    pub config: Option<String>,

    /// Profile to use from the config file
    #[arg(long, global = true, env = "S3SIFT_PROFILE")]
    pub profile: Option<String>,

    /// AWS region, overriding the profile
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format for listings (text, json)
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Disable SSL certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Compression hint accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CompressionArg {
    None,
    Gzip,
    Bzip2,
}

impl From<CompressionArg> for CompressionType {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => CompressionType::None,
            CompressionArg::Gzip => CompressionType::Gzip,
            CompressionArg::Bzip2 => CompressionType::Bzip2,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List buckets
    Buckets,

    /// List directories (common prefixes) under a prefix
    Dirs {
        /// S3 path (s3://bucket/prefix)
        #[arg(value_name = "PATH")]
        path: String,

        /// Keys requested per page (1-1000, server default when unset)
        #[arg(long, value_parser = clap::value_parser!(i32).range(1..=1000))]
        max_keys: Option<i32>,
    },

    /// List every key under a prefix
    Keys {
        /// S3 path (s3://bucket/prefix)
        #[arg(value_name = "PATH")]
        path: String,

        /// Keys requested per page (1-1000, server default when unset)
        #[arg(long, value_parser = clap::value_parser!(i32).range(1..=1000))]
        max_keys: Option<i32>,
    },

    /// Run an S3 Select query against a JSON Lines object
    Select {
        /// S3 path (s3://bucket/key)
        #[arg(value_name = "PATH")]
        path: String,

        /// SQL expression, e.g. "SELECT * FROM S3Object s"
        #[arg(short, long)]
        query: String,

        /// Override the compression inferred from the key suffix
        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Commands::Select { query, .. } = &self.command {
            if query.trim().is_empty() {
                anyhow::bail!("Query cannot be empty");
            }
        }
        if let Some(region) = &self.region {
            crate::config::validate_region(region)?;
        }
        Ok(())
    }
}

/// Parse S3 path into bucket and key components
///
/// Accepts both URI-style `s3://bucket/key` and the short `s3/bucket/key`.
pub fn parse_s3_path(path: &str) -> anyhow::Result<(String, Option<String>)> {
    let path = path.trim();

    let stripped = if let Some(p) = path.strip_prefix("s3://") {
        p
    } else if let Some(p) = path.strip_prefix("s3/") {
        p
    } else {
        anyhow::bail!("Invalid S3 path format. Expected: s3://bucket/key");
    };

    let (bucket, key) = match stripped.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (stripped, ""),
    };

    if bucket.is_empty() {
        anyhow::bail!("Bucket name cannot be empty");
    }

    let key = if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    };

    Ok((bucket.to_string(), key))
}
