//! Command handler modules for osmc-cli.
//!
//! Shared utilities used by multiple command paths live here.

pub mod ingest;

use anyhow::{Context, Result};
use osmc_config::{IngestConfig, UnusedKeyPolicy};
use osmc_feed::{HttpFeedSource, RetryPolicy};
use tracing::warn;

pub struct Loaded {
    pub config_hash: String,
    pub ingest: IngestConfig,
}

/// Layered config, or defaults when no paths are given. Unused keys are warned,
/// not fatal.
pub fn load_config(paths: &[String]) -> Result<Loaded> {
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = osmc_config::load_layered_yaml(&path_refs)?;

    let unused = osmc_config::report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    for ptr in &unused.unused_leaf_pointers {
        warn!(event = "config_unused_key", pointer = %ptr, "config key is not read by ingest");
    }

    Ok(Loaded {
        config_hash: loaded.config_hash.clone(),
        ingest: loaded.ingest()?,
    })
}

pub fn http_source(feed: &osmc_config::FeedConfig) -> Result<HttpFeedSource> {
    let retry = RetryPolicy {
        max_attempts: feed.max_attempts,
        backoff: feed.backoff(),
    };
    HttpFeedSource::new(feed.base_url.clone(), feed.timeout(), retry)
        .with_context(|| format!("build http feed source for {}", feed.base_url))
}
