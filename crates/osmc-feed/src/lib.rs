//! osmc-feed
//!
//! Replication feed boundary: where a sequence number becomes canonical
//! changeset records.
//!
//! ```text
//! SequenceNumber --locator--> address
//!                --loader---> cached or fetched gzip bytes
//!                --decoder--> Vec<RawElement>
//!                --formatter-> ChangesetRecord (per element)
//! ```
//!
//! This crate does **not** write to a store; the reconciliation engine and the
//! range orchestrator own that.

pub mod decoder;
pub mod error;
pub mod formatter;
pub mod loader;
pub mod locator;
pub mod source;
pub mod state;

pub use decoder::{decode_segment, NestedEntry, RawElement};
pub use error::FeedError;
pub use formatter::{format_changeset, FormatError, FormatMode, FormatReport, Formatted};
pub use loader::{LoadedSegment, SequenceLoader};
pub use source::{FeedSource, HttpFeedSource, RetryPolicy};
pub use state::FeedState;
