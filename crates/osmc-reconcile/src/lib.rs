//! osmc-reconcile
//!
//! Changeset reconciliation engine.
//!
//! Policy, per incoming record `R` with sequence `s` against stored state `C`:
//! - no `C` => insert `R` with empty history
//! - `s >= C.sequence_from` => overwrite differing fields, snapshot the prior
//!   state into history (only when something changed)
//! - `s < C.sequence_from` => authoritative fields untouched; file `R` in history
//!   once per stale sequence
//!
//! [`plan`] is deterministic, pure logic with no IO. [`reconcile`] executes a plan
//! against a [`ChangesetStore`] with optimistic concurrency.

mod engine;
mod store;
mod types;

pub use engine::{plan, reconcile, MAX_RECONCILE_ATTEMPTS};
pub use store::{ChangesetStore, CreateOutcome, MemoryStore, UpdateOutcome};
pub use types::*;
