use osmc_schemas::{ChangesetRecord, HistoryEntry, SequenceNumber};
use serde::Serialize;

/// One field overwritten by a current-or-newer record.
///
/// Values are rendered as JSON text for logging; comparison itself is typed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub before: String,
    pub after: String,
}

/// What the engine decided to do with one incoming record.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcilePlan {
    /// No stored record: create it with empty history.
    Insert,

    /// Current-or-newer data with at least one differing field.
    Apply {
        changes: Vec<FieldChange>,
        /// Pre-update snapshot appended to history.
        snapshot: HistoryEntry,
        /// New authoritative state.
        next: ChangesetRecord,
    },

    /// Stale data not yet filed for this sequence.
    FileStale { entry: HistoryEntry },

    /// Stale data whose sequence is already in history.
    AlreadyFiled,

    /// Current-or-newer data identical to what is stored.
    Unchanged,
}

/// Result reported back to the orchestrator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Inserted,
    Updated {
        /// Authority before the update.
        previous: SequenceNumber,
        changes: Vec<FieldChange>,
    },
    StaleFiled {
        authority: SequenceNumber,
    },
    StaleAlreadyFiled {
        authority: SequenceNumber,
    },
    Unchanged,
}

/// The input record, returned regardless of outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled {
    pub record: ChangesetRecord,
    pub outcome: ReconcileOutcome,
}
