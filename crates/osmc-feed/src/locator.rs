//! Sequence number → feed address.
//!
//! The publisher partitions segments by the nine-digit zero-padded sequence number
//! split into three groups: sequence `4711` lives at `000/004/711.osm.gz`.

use osmc_schemas::SequenceNumber;

pub const DEFAULT_BASE_URL: &str = "https://planet.osm.org/replication/changesets";
pub const SEGMENT_EXTENSION: &str = ".osm.gz";
pub const CAPTURE_EXTENSION: &str = ".jsonl";
pub const STATE_FILE: &str = "state.yaml";

pub fn padded(seq: SequenceNumber) -> String {
    format!("{:09}", seq.get())
}

pub fn path_segments(seq: SequenceNumber) -> [String; 3] {
    let p = padded(seq);
    [p[0..3].to_string(), p[3..6].to_string(), p[6..9].to_string()]
}

/// `"123/456/789.osm.gz"`
pub fn relative_path(seq: SequenceNumber) -> String {
    let [a, b, c] = path_segments(seq);
    format!("{a}/{b}/{c}{SEGMENT_EXTENSION}")
}

pub fn remote_url(base_url: &str, seq: SequenceNumber) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), relative_path(seq))
}

pub fn state_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), STATE_FILE)
}

/// Fetch-cache file name (unpadded, one file per sequence).
pub fn cache_file_name(seq: SequenceNumber) -> String {
    format!("{seq}{SEGMENT_EXTENSION}")
}

/// Local-capture file name.
pub fn capture_file_name(seq: SequenceNumber) -> String {
    format!("{seq}{CAPTURE_EXTENSION}")
}
