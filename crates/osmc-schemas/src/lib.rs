//! osmc-schemas
//!
//! Shared data model for the changeset replication workspace.
//!
//! Every crate that touches a changeset (feed formatter, reconciliation engine,
//! Postgres store, capture writer) speaks these types. No IO lives here.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sequence numbers
// ---------------------------------------------------------------------------

/// A replication sequence number.
///
/// The feed partitions segments by the nine-digit zero-padded form of the number,
/// so values are limited to `0..=999_999_999`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SequenceNumber(u32);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sequence number {0} does not fit in 9 decimal digits")]
pub struct SequenceOutOfRange(pub u64);

impl SequenceNumber {
    pub const MAX: u32 = 999_999_999;

    pub fn new(n: u64) -> Result<Self, SequenceOutOfRange> {
        if n > Self::MAX as u64 {
            return Err(SequenceOutOfRange(n));
        }
        Ok(Self(n as u32))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Storage representation (Postgres `bigint`).
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Next sequence number, or `None` at the top of the range.
    pub fn next(self) -> Option<Self> {
        if self.0 >= Self::MAX {
            None
        } else {
            Some(Self(self.0 + 1))
        }
    }
}

impl TryFrom<u32> for SequenceNumber {
    type Error = SequenceOutOfRange;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n as u64)
    }
}

impl TryFrom<i64> for SequenceNumber {
    type Error = SequenceOutOfRange;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        let n = u64::try_from(n).map_err(|_| SequenceOutOfRange(u64::MAX))?;
        Self::new(n)
    }
}

impl From<SequenceNumber> for u32 {
    fn from(s: SequenceNumber) -> u32 {
        s.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SequenceNumber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u64 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid sequence number '{s}'"))?;
        Self::new(n).map_err(|e| e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// A changeset timestamp.
///
/// Persisting runs parse feed timestamps into UTC instants. Preview runs (local
/// capture) keep the literal feed string so the capture is byte-faithful.
///
/// Instants serialize as RFC 3339 with a `Z` suffix (`2021-11-18T06:17:42Z`); that
/// is the textual form stored inside `history`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Instant(DateTime<Utc>),
    Raw(String),
}

impl Timestamp {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Instant(dt) => Some(*dt),
            Timestamp::Raw(_) => None,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Instant(dt) => write!(
                f,
                "{}",
                dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            ),
            Timestamp::Raw(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Changeset record
// ---------------------------------------------------------------------------

/// Every changeset field except the identifier, the authority marker and history.
///
/// Attribute-derived fields are `None` when the feed element did not carry the
/// attribute. Tag-derived fields are always meaningful: the feed publishes a
/// changeset's tag set as a whole. Absent fields are left out of the JSON form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangesetFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imagery_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub additional_tags: BTreeMap<String, String>,
}

/// One formatted feed observation of a changeset, or the authoritative state of a
/// stored one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangesetRecord {
    pub changeset_id: i64,
    /// Sequence whose data populates `fields`.
    pub sequence_from: SequenceNumber,
    #[serde(flatten)]
    pub fields: ChangesetFields,
}

impl ChangesetRecord {
    pub fn new(changeset_id: i64, sequence_from: SequenceNumber) -> Self {
        Self {
            changeset_id,
            sequence_from,
            fields: ChangesetFields::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    /// Authoritative state replaced by a current-or-newer sequence.
    Superseded,
    /// Observation from a sequence older than the authority at the time it arrived.
    Stale,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub sequence_from: SequenceNumber,
    #[serde(flatten)]
    pub fields: ChangesetFields,
}

impl HistoryEntry {
    /// Snapshot of an authoritative state about to be replaced.
    pub fn superseded(record: &ChangesetRecord) -> Self {
        Self {
            kind: HistoryKind::Superseded,
            sequence_from: record.sequence_from,
            fields: record.fields.clone(),
        }
    }

    /// Out-of-order observation filed without becoming authoritative.
    pub fn stale(record: &ChangesetRecord) -> Self {
        Self {
            kind: HistoryKind::Stale,
            sequence_from: record.sequence_from,
            fields: record.fields.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored changeset
// ---------------------------------------------------------------------------

/// Optimistic-concurrency token of a stored changeset.
///
/// Every persisted mutation either moves `sequence_from` or appends history, and
/// history is append-only, so the pair changes on every write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Revision {
    pub sequence_from: SequenceNumber,
    pub history_len: usize,
}

/// Durable state for one changeset id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredChangeset {
    #[serde(flatten)]
    pub record: ChangesetRecord,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl StoredChangeset {
    pub fn new(record: ChangesetRecord) -> Self {
        Self {
            record,
            history: Vec::new(),
        }
    }

    pub fn revision(&self) -> Revision {
        Revision {
            sequence_from: self.record.sequence_from,
            history_len: self.history.len(),
        }
    }

    /// True if any history entry (of either kind) was filed from `seq`.
    pub fn history_has_sequence(&self, seq: SequenceNumber) -> bool {
        self.history.iter().any(|h| h.sequence_from == seq)
    }
}
