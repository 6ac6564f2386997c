//! Upstream feed metadata (`state.yaml`).
//!
//! The publisher exposes the latest published sequence number as a tiny YAML
//! document next to the segments:
//!
//! ```text
//! ---
//! last_run: 2024-05-20 12:34:56.789012000 +00:00
//! sequence: 6123456
//! ```

use osmc_schemas::SequenceNumber;
use serde::Deserialize;

use crate::FeedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub sequence: SequenceNumber,
    /// Publisher's last run time, kept verbatim.
    pub last_run: Option<String>,
}

#[derive(Deserialize)]
struct StateDoc {
    sequence: u64,
    #[serde(default)]
    last_run: Option<serde_yaml::Value>,
}

impl FeedState {
    pub fn parse(text: &str) -> Result<Self, FeedError> {
        let doc: StateDoc = serde_yaml::from_str(text)
            .map_err(|e| FeedError::Decode(format!("state descriptor: {e}")))?;
        let sequence = SequenceNumber::new(doc.sequence)
            .map_err(|e| FeedError::Decode(format!("state descriptor: {e}")))?;
        let last_run = doc.last_run.and_then(|v| match v {
            serde_yaml::Value::String(s) => Some(s),
            serde_yaml::Value::Null => None,
            other => serde_yaml::to_string(&other)
                .ok()
                .map(|s| s.trim().to_string()),
        });
        Ok(FeedState { sequence, last_run })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_publisher_state() {
        let st = FeedState::parse(
            "---\nlast_run: 2024-05-20 12:34:56.789012000 +00:00\nsequence: 6123456\n",
        )
        .unwrap();
        assert_eq!(st.sequence.get(), 6_123_456);
        assert_eq!(
            st.last_run.as_deref(),
            Some("2024-05-20 12:34:56.789012000 +00:00")
        );
    }

    #[test]
    fn missing_sequence_is_decode_error() {
        let err = FeedState::parse("---\nlast_run: x\n").unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }

    #[test]
    fn out_of_range_sequence_is_rejected() {
        assert!(FeedState::parse("sequence: 1000000000\n").is_err());
    }
}
