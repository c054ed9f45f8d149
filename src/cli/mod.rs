//! Command-line interface for s3sift
//!
//! ```bash
//! # Buckets visible to the credential
//! s3sift buckets
//!
//! # Directories directly under a prefix
//! s3sift dirs s3://bucket/logs/ --format json
//!
//! # Every key under a prefix
//! s3sift keys s3://bucket/logs/2024/
//!
//! # Stream matching records of a JSON Lines object
//! s3sift select s3://bucket/logs/2024/01.json.gz --query "SELECT * FROM S3Object s WHERE s.level = 'error'"
//! ```

pub mod args;
pub mod commands;

use crate::config;
use crate::core::Core;
use anyhow::{Context, Result};
use tracing::debug;

use args::{Cli, Commands};

/// Run the CLI application
pub async fn run(cli: Cli) -> Result<()> {
    cli.validate().context("Invalid arguments")?;
    debug!("CLI arguments: {:?}", cli);

    let mut config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())
        .context("Failed to load configuration")?;
    if let Some(region) = &cli.region {
        config.set_region(region)?;
    }
    if cli.insecure {
        config.transport.insecure_tls = true;
    }

    let core = Core::new(config)?;

    match cli.command {
        Commands::Buckets => {
            commands::cmd_buckets(&core, cli.format).await?;
        }
        Commands::Dirs { path, max_keys } => {
            commands::cmd_dirs(&core, &path, max_keys, cli.format).await?;
        }
        Commands::Keys { path, max_keys } => {
            commands::cmd_keys(&core, &path, max_keys, cli.format).await?;
        }
        Commands::Select {
            path,
            query,
            compression,
        } => {
            commands::cmd_select(&core, &path, &query, compression).await?;
        }
    }

    debug!("Command completed successfully");
    Ok(())
}

/// Initialize logging to stderr. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
