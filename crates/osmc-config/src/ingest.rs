use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://planet.osm.org/replication/changesets";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 60,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./source"),
            output_dir: PathBuf::from("./output"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Abort the range on the first failed sequence.
    pub fail_fast: bool,
}

/// Effective configuration of one ingest invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub feed: FeedConfig,
    pub paths: PathsConfig,
    pub run: RunConfig,
}

impl IngestConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: IngestConfig =
            serde_json::from_value(v.clone()).context("config does not match ingest schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.feed.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("CONFIG_INVALID feed.base_url must be an http(s) URL: {url}");
        }
        if self.feed.timeout_secs == 0 {
            bail!("CONFIG_INVALID feed.timeout_secs must be > 0");
        }
        if self.feed.max_attempts == 0 {
            bail!("CONFIG_INVALID feed.max_attempts must be >= 1");
        }
        Ok(())
    }
}
