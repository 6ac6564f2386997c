//! Read-through segment cache in front of a [`FeedSource`].
//!
//! Invariants:
//! - a remotely fetched payload is durably in the cache before `load` returns;
//! - cache entries are the exact published bytes (no re-encoding);
//! - cache writes are atomic (temp file + rename), so a crash cannot leave a
//!   truncated entry that a later run would trust.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use osmc_schemas::SequenceNumber;
use tracing::info;

use crate::decoder::{decode_segment, RawElement};
use crate::locator;
use crate::{FeedError, FeedSource};

/// A decoded segment plus where its bytes came from.
#[derive(Debug, Clone)]
pub struct LoadedSegment {
    pub sequence: SequenceNumber,
    pub elements: Vec<RawElement>,
    pub fetched_remotely: bool,
}

pub struct SequenceLoader {
    source: Arc<dyn FeedSource>,
    cache_dir: PathBuf,
}

impl SequenceLoader {
    pub fn new(source: Arc<dyn FeedSource>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_path(&self, seq: SequenceNumber) -> PathBuf {
        self.cache_dir.join(locator::cache_file_name(seq))
    }

    /// Raw payload for `seq` and whether it was fetched remotely.
    pub async fn load_bytes(&self, seq: SequenceNumber) -> Result<(Vec<u8>, bool), FeedError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| FeedError::cache(&self.cache_dir, e))?;

        let path = self.cache_path(seq);
        if path.is_file() {
            let bytes = fs::read(&path).map_err(|e| FeedError::cache(&path, e))?;
            info!(
                event = "fetch_cached",
                sequence = %seq,
                bytes = bytes.len(),
                "segment read from cache"
            );
            return Ok((bytes, false));
        }

        let bytes = self.source.fetch_segment(seq).await?;
        write_atomic(&self.cache_dir, &path, &bytes)?;
        info!(
            event = "fetch_remote",
            sequence = %seq,
            source = self.source.name(),
            bytes = bytes.len(),
            "segment fetched and cached"
        );
        Ok((bytes, true))
    }

    /// Load and decode one segment.
    pub async fn load(&self, seq: SequenceNumber) -> Result<LoadedSegment, FeedError> {
        let (bytes, fetched_remotely) = self.load_bytes(seq).await?;
        let elements = decode_segment(&bytes)?;
        Ok(LoadedSegment {
            sequence: seq,
            elements,
            fetched_remotely,
        })
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), FeedError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| FeedError::cache(dir, e))?;
    tmp.write_all(bytes).map_err(|e| FeedError::cache(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| FeedError::cache(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| FeedError::cache(path, e.error))?;
    Ok(())
}
