//! Local capture files: one JSON record per line, one file per sequence.
//!
//! The file's presence means the sequence was fully processed, so it is only
//! ever linked into place complete, and never over an existing file.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use osmc_schemas::ChangesetRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePublish {
    Written,
    /// Another writer published the same file first; ours was discarded.
    AlreadyPresent,
}

pub fn publish_capture(path: &Path, records: &[ChangesetRecord]) -> Result<CapturePublish> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp capture file in {}", dir.display()))?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        for r in records {
            serde_json::to_writer(&mut w, r).context("serialize capture record")?;
            w.write_all(b"\n").context("write capture record")?;
        }
        w.flush().context("flush capture file")?;
    }
    tmp.as_file().sync_all().context("sync capture file")?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(CapturePublish::Written),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(CapturePublish::AlreadyPresent),
        Err(e) => Err(e.error).with_context(|| format!("publish capture {}", path.display())),
    }
}
