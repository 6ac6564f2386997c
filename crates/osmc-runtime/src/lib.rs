//! osmc-runtime
//!
//! Range orchestrator: drives loader, decoder, formatter and (in store mode) the
//! reconciliation engine over an inclusive range of sequence numbers.
//!
//! Sequences are processed in increasing order, one at a time. A sequence that
//! fails to fetch, decode or persist is recorded in [`RangeReport::failed`] and the
//! run moves on, unless `fail_fast` is set.

mod capture;
mod report;
mod runner;

pub use capture::{publish_capture, CapturePublish};
pub use report::{FailedSequence, RangeReport, RunStats};
pub use runner::{Output, RangeRunner};
