use std::path::PathBuf;

/// Errors surfaced by the feed boundary.
///
/// `Fetch` and `Status` come from the remote transport; `Decode` is fatal for the
/// segment being decoded; `Cache` covers local cache IO.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("remote returned http {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("cache io error at {}: {source}", .path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FeedError {
    pub fn is_fetch(&self) -> bool {
        matches!(self, FeedError::Fetch { .. } | FeedError::Status { .. })
    }

    /// Transport failures, 429 and 5xx are worth another attempt; other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Fetch { .. } => true,
            FeedError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn cache(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FeedError::Cache {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        let status = |s| FeedError::Status {
            url: "u".to_string(),
            status: s,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(status(404).is_fetch());
        assert!(!FeedError::Decode("x".to_string()).is_retryable());
    }

    #[test]
    fn display_status() {
        let err = FeedError::Status {
            url: "http://x/000/000/001.osm.gz".to_string(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "remote returned http 404 for http://x/000/000/001.osm.gz"
        );
    }
}
