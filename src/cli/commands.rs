use crate::cli::args::{parse_s3_path, CompressionArg, OutputFormat};
use crate::compression::CompressionType;
use crate::core::Core;
use crate::s3::types::{ListRequest, SelectRequest};
use crate::select::{self, SelectSummary};
use anyhow::{Context, Result};
use std::io::Write;
use tracing::info;

/// List buckets command
pub async fn cmd_buckets(core: &Core, format: OutputFormat) -> Result<()> {
    let buckets = core.list_buckets().await?;
    print_entries(&buckets, format)
}

/// List directories command (hierarchical listing)
pub async fn cmd_dirs(
    core: &Core,
    path: &str,
    max_keys: Option<i32>,
    format: OutputFormat,
) -> Result<()> {
    let (bucket, prefix) = parse_s3_path(path)?;
    let prefix = prefix.unwrap_or_default();

    let request = with_page_size(ListRequest::hierarchical(&bucket, &prefix), max_keys);
    let dirs = core
        .list_entries(request)
        .await
        .with_context(|| format!("Failed to list directories of s3://{}/{}", bucket, prefix))?;
    print_entries(&dirs, format)
}

/// List keys command (flat listing)
pub async fn cmd_keys(
    core: &Core,
    path: &str,
    max_keys: Option<i32>,
    format: OutputFormat,
) -> Result<()> {
    let (bucket, prefix) = parse_s3_path(path)?;
    let prefix = prefix.unwrap_or_default();

    let request = with_page_size(ListRequest::flat(&bucket, &prefix), max_keys);
    let keys = core
        .list_entries(request)
        .await
        .with_context(|| format!("Failed to list keys of s3://{}/{}", bucket, prefix))?;
    print_entries(&keys, format)
}

/// Select command: stream matching records to stdout as they arrive
pub async fn cmd_select(
    core: &Core,
    path: &str,
    query: &str,
    compression: Option<CompressionArg>,
) -> Result<SelectSummary> {
    let (bucket, key) = parse_s3_path(path)?;
    let key = key.ok_or_else(|| anyhow::anyhow!("Key required for select command"))?;

    let mut request = SelectRequest::json_lines(&bucket, &key, query);
    if let Some(compression) = compression {
        request = request.with_compression(CompressionType::from(compression));
    }

    let mut stdout = tokio::io::stdout();
    let summary = select::select_to_writer(core.store(), request, &mut stdout)
        .await
        .with_context(|| format!("Select failed on s3://{}/{}", bucket, key))?;

    info!(
        chunks = summary.chunks,
        bytes = %format_bytes(summary.bytes_written),
        "select complete"
    );
    Ok(summary)
}

fn with_page_size(request: ListRequest, max_keys: Option<i32>) -> ListRequest {
    match max_keys {
        Some(max_keys) => request.with_max_keys(max_keys),
        None => request,
    }
}

fn print_entries(entries: &[String], format: OutputFormat) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::with_capacity(64 * 1024, stdout.lock());
    write_entries(&mut out, entries, format)?;
    out.flush()?;
    Ok(())
}

/// Write a listing: one entry per line, or a JSON array
pub fn write_entries<W: Write>(out: &mut W, entries: &[String], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in entries {
                writeln!(out, "{}", entry)?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, entries)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Format bytes in human-readable form (B, KB, MB, GB, TB)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}
