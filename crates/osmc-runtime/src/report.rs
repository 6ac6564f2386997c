use std::fmt;

use osmc_feed::FormatReport;
use osmc_reconcile::ReconcileOutcome;
use osmc_schemas::{ChangesetRecord, SequenceNumber};
use serde::Serialize;

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub fetch_remote: u64,
    pub fetch_cached: u64,
    pub elements: u64,
    pub inserted: u64,
    pub updated: u64,
    pub field_changed: u64,
    pub stale_record_filed: u64,
    pub stale_already_filed: u64,
    pub unchanged: u64,
    pub unknown_attribute: u64,
    pub unknown_element_kind: u64,
    pub invalid_attribute_value: u64,
    pub skipped_elements: u64,
}

impl RunStats {
    pub(crate) fn record_fetch(&mut self, fetched_remotely: bool) {
        if fetched_remotely {
            self.fetch_remote += 1;
        } else {
            self.fetch_cached += 1;
        }
    }

    pub(crate) fn record_format(&mut self, r: &FormatReport) {
        self.unknown_attribute += r.unknown_attributes as u64;
        self.unknown_element_kind += r.unknown_entries as u64;
        self.invalid_attribute_value += r.invalid_values as u64;
    }

    pub(crate) fn record_outcome(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Inserted => self.inserted += 1,
            ReconcileOutcome::Updated { changes, .. } => {
                self.updated += 1;
                self.field_changed += changes.len() as u64;
            }
            ReconcileOutcome::StaleFiled { .. } => self.stale_record_filed += 1,
            ReconcileOutcome::StaleAlreadyFiled { .. } => self.stale_already_filed += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Stable `(name, value)` pairs for `key=value` output.
    pub fn pairs(&self) -> [(&'static str, u64); 13] {
        [
            ("fetch_remote", self.fetch_remote),
            ("fetch_cached", self.fetch_cached),
            ("elements", self.elements),
            ("inserted", self.inserted),
            ("updated", self.updated),
            ("field_changed", self.field_changed),
            ("stale_record_filed", self.stale_record_filed),
            ("stale_already_filed", self.stale_already_filed),
            ("unchanged", self.unchanged),
            ("unknown_attribute", self.unknown_attribute),
            ("unknown_element_kind", self.unknown_element_kind),
            ("invalid_attribute_value", self.invalid_attribute_value),
            ("skipped_elements", self.skipped_elements),
        ]
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.pairs().iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSequence {
    pub sequence: SequenceNumber,
    /// Records already written to the store before the failure.
    pub applied: usize,
    pub error: String,
}

/// Everything one `run` produced.
#[derive(Debug, Clone, Default)]
pub struct RangeReport {
    /// Processed records in sequence order, then element order.
    pub records: Vec<ChangesetRecord>,
    pub failed: Vec<FailedSequence>,
    /// Capture-mode sequences whose output already existed.
    pub skipped: Vec<SequenceNumber>,
    pub stats: RunStats,
}

impl RangeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Smallest and largest changeset id among `records`.
    pub fn changeset_id_bounds(&self) -> Option<(i64, i64)> {
        let mut ids = self.records.iter().map(|r| r.changeset_id);
        let first = ids.next()?;
        Some(ids.fold((first, first), |(lo, hi), id| (lo.min(id), hi.max(id))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osmc_reconcile::FieldChange;

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n).unwrap()
    }

    #[test]
    fn bounds_over_unordered_ids() {
        let mut report = RangeReport::default();
        assert_eq!(report.changeset_id_bounds(), None);
        for id in [40, 7, 99, 12] {
            report.records.push(ChangesetRecord::new(id, seq(1)));
        }
        assert_eq!(report.changeset_id_bounds(), Some((7, 99)));
    }

    #[test]
    fn outcomes_feed_counters() {
        let mut stats = RunStats::default();
        stats.record_outcome(&ReconcileOutcome::Inserted);
        stats.record_outcome(&ReconcileOutcome::Updated {
            previous: seq(1),
            changes: vec![
                FieldChange { field: "open", before: "true".into(), after: "false".into() },
                FieldChange { field: "closed_at", before: "null".into(), after: "\"x\"".into() },
            ],
        });
        stats.record_outcome(&ReconcileOutcome::StaleFiled { authority: seq(2) });
        stats.record_outcome(&ReconcileOutcome::Unchanged);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.field_changed, 2);
        assert_eq!(stats.stale_record_filed, 1);
        assert_eq!(stats.unchanged, 1);
    }

    #[test]
    fn display_is_key_value_lines() {
        let stats = RunStats { fetch_remote: 2, ..RunStats::default() };
        let text = stats.to_string();
        assert!(text.starts_with("fetch_remote=2\nfetch_cached=0\n"));
        assert_eq!(text.lines().count(), 13);
    }
}
