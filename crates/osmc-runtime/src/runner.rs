use std::path::Path;

use anyhow::{Context, Result};
use osmc_feed::{format_changeset, locator, FormatMode, LoadedSegment, SequenceLoader};
use osmc_reconcile::{reconcile, ChangesetStore};
use osmc_schemas::{ChangesetRecord, SequenceNumber};
use tracing::{info, warn};

use crate::capture::{publish_capture, CapturePublish};
use crate::report::{FailedSequence, RangeReport, RunStats};

/// Where formatted records go.
#[derive(Clone, Copy)]
pub enum Output<'a> {
    /// Reconcile every record into the store.
    Store(&'a dyn ChangesetStore),
    /// Write `<dir>/<n>.jsonl` per sequence; never touches a store.
    LocalCapture(&'a Path),
}

impl Output<'_> {
    fn format_mode(&self) -> FormatMode {
        match self {
            Output::Store(_) => FormatMode::Persist,
            Output::LocalCapture(_) => FormatMode::Preview,
        }
    }
}

pub struct RangeRunner {
    loader: SequenceLoader,
    fail_fast: bool,
}

impl RangeRunner {
    pub fn new(loader: SequenceLoader) -> Self {
        Self {
            loader,
            fail_fast: false,
        }
    }

    /// Abort on the first failed sequence instead of recording it and moving on.
    pub fn fail_fast(mut self, yes: bool) -> Self {
        self.fail_fast = yes;
        self
    }

    /// Process `start..=end` (swapped if reversed) in increasing order.
    pub async fn run(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
        output: Output<'_>,
    ) -> Result<RangeReport> {
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };

        if let Output::LocalCapture(dir) = output {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create output dir {}", dir.display()))?;
        }

        let mut report = RangeReport::default();
        let mut next = Some(lo);

        while let Some(seq) = next.filter(|s| *s <= hi) {
            next = seq.next();

            if let Output::LocalCapture(dir) = output {
                if capture_path(dir, seq).exists() {
                    info!(event = "capture_skipped", sequence = %seq, "capture already present");
                    report.skipped.push(seq);
                    continue;
                }
            }

            let mut records = Vec::new();
            match self.process(seq, output, &mut report.stats, &mut records).await {
                Ok(Processed::Done) => {
                    info!(
                        event = "sequence_done",
                        sequence = %seq,
                        records = records.len(),
                        "sequence processed"
                    );
                    report.records.extend(records);
                }
                Ok(Processed::LostPublishRace) => report.skipped.push(seq),
                Err(e) => {
                    // Store writes before the failing element are durable; an
                    // unpublished capture is not.
                    let applied = match output {
                        Output::Store(_) => records.len(),
                        Output::LocalCapture(_) => 0,
                    };
                    let error = format!("{e:#}");
                    warn!(
                        event = "sequence_failed",
                        sequence = %seq,
                        applied,
                        error = %error,
                        "sequence failed"
                    );
                    records.truncate(applied);
                    report.records.extend(records);
                    if self.fail_fast {
                        return Err(e.context(format!("sequence {seq}")));
                    }
                    report.failed.push(FailedSequence {
                        sequence: seq,
                        applied,
                        error,
                    });
                }
            }
        }

        if let Some((min_id, max_id)) = report.changeset_id_bounds() {
            info!(
                event = "range_done",
                start = %lo,
                end = %hi,
                min_changeset_id = min_id,
                max_changeset_id = max_id,
                failed = report.failed.len(),
                "range processed"
            );
        }

        Ok(report)
    }

    async fn process(
        &self,
        seq: SequenceNumber,
        output: Output<'_>,
        stats: &mut RunStats,
        records: &mut Vec<ChangesetRecord>,
    ) -> Result<Processed> {
        let LoadedSegment {
            elements,
            fetched_remotely,
            ..
        } = self
            .loader
            .load(seq)
            .await
            .with_context(|| format!("load sequence {seq}"))?;
        stats.record_fetch(fetched_remotely);

        let mode = output.format_mode();
        records.reserve(elements.len());

        for raw in &elements {
            stats.elements += 1;
            let formatted = match format_changeset(raw, seq, mode) {
                Ok(f) => f,
                Err(e) => {
                    stats.skipped_elements += 1;
                    warn!(event = "element_skipped", sequence = %seq, error = %e, "changeset element skipped");
                    continue;
                }
            };
            stats.record_format(&formatted.report);

            match output {
                Output::Store(store) => {
                    let reconciled = reconcile(store, formatted.record).await?;
                    stats.record_outcome(&reconciled.outcome);
                    records.push(reconciled.record);
                }
                Output::LocalCapture(_) => records.push(formatted.record),
            }
        }

        if let Output::LocalCapture(dir) = output {
            let path = capture_path(dir, seq);
            match publish_capture(&path, records)? {
                CapturePublish::Written => {}
                CapturePublish::AlreadyPresent => {
                    warn!(
                        event = "capture_skipped",
                        sequence = %seq,
                        "capture appeared while processing; kept the existing file"
                    );
                    return Ok(Processed::LostPublishRace);
                }
            }
        }

        Ok(Processed::Done)
    }
}

enum Processed {
    /// Records were reconciled or published.
    Done,
    LostPublishRace,
}

fn capture_path(dir: &Path, seq: SequenceNumber) -> std::path::PathBuf {
    dir.join(locator::capture_file_name(seq))
}
