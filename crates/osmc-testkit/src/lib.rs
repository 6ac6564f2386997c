//! osmc-testkit
//!
//! Deterministic fixtures for scenario tests: an in-memory [`FeedSource`] and
//! builders for gzip-compressed OSM changeset segments.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression;
use osmc_feed::{FeedError, FeedSource, FeedState};
use osmc_schemas::SequenceNumber;

pub fn seq(n: u64) -> SequenceNumber {
    match SequenceNumber::new(n) {
        Ok(s) => s,
        Err(e) => panic!("fixture sequence: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Segment builders
// ---------------------------------------------------------------------------

/// One `<changeset>` element.
#[derive(Debug, Clone, Default)]
pub struct ChangesetXml {
    attrs: Vec<(String, String)>,
    tags: Vec<(String, String)>,
    discussion: bool,
}

impl ChangesetXml {
    pub fn new(id: i64) -> Self {
        Self::default().attr("id", &id.to_string())
    }

    /// Element without an `id`, for skip-path tests.
    pub fn without_id() -> Self {
        Self::default()
    }

    pub fn attr(mut self, k: &str, v: &str) -> Self {
        self.attrs.push((k.to_string(), v.to_string()));
        self
    }

    pub fn tag(mut self, k: &str, v: &str) -> Self {
        self.tags.push((k.to_string(), v.to_string()));
        self
    }

    pub fn discussion(mut self) -> Self {
        self.discussion = true;
        self
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("  <changeset");
        for (k, v) in &self.attrs {
            out.push_str(&format!(" {k}=\"{}\"", escape(v)));
        }
        if self.tags.is_empty() && !self.discussion {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for (k, v) in &self.tags {
            out.push_str(&format!("    <tag k=\"{}\" v=\"{}\"/>\n", escape(k), escape(v)));
        }
        if self.discussion {
            out.push_str("    <discussion><comment uid=\"1\" user=\"x\"><text>ok</text></comment></discussion>\n");
        }
        out.push_str("  </changeset>\n");
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn segment_xml(changesets: &[ChangesetXml]) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<osm version=\"0.6\" generator=\"osmc-testkit\">\n",
    );
    for c in changesets {
        c.write_xml(&mut out);
    }
    out.push_str("</osm>\n");
    out
}

pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    // Writes into a Vec cannot fail.
    let _ = enc.write_all(bytes);
    enc.finish().unwrap_or_default()
}

/// Gzip-compressed segment payload.
pub fn segment(changesets: &[ChangesetXml]) -> Vec<u8> {
    gzip(segment_xml(changesets).as_bytes())
}

// ---------------------------------------------------------------------------
// Fixture feed
// ---------------------------------------------------------------------------

/// In-memory [`FeedSource`] that counts fetches.
///
/// Unknown sequences answer HTTP 404; sequences marked failing answer 503.
#[derive(Debug, Default)]
pub struct FixtureFeed {
    segments: Mutex<BTreeMap<SequenceNumber, Vec<u8>>>,
    failing: Mutex<BTreeSet<SequenceNumber>>,
    latest: Option<SequenceNumber>,
    fetches: AtomicUsize,
}

impl FixtureFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segment(self, n: u64, payload: Vec<u8>) -> Self {
        if let Ok(mut m) = self.segments.lock() {
            m.insert(seq(n), payload);
        }
        self
    }

    pub fn with_failure(self, n: u64) -> Self {
        if let Ok(mut f) = self.failing.lock() {
            f.insert(seq(n));
        }
        self
    }

    pub fn with_latest(mut self, n: u64) -> Self {
        self.latest = Some(seq(n));
        self
    }

    /// Total `fetch_segment` calls, successful or not.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn url(seq: SequenceNumber) -> String {
        format!("fixture://{}", osmc_feed::locator::relative_path(seq))
    }
}

#[async_trait::async_trait]
impl FeedSource for FixtureFeed {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_segment(&self, seq: SequenceNumber) -> Result<Vec<u8>, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&seq))
            .unwrap_or(false);
        if failing {
            return Err(FeedError::Status {
                url: Self::url(seq),
                status: 503,
            });
        }

        self.segments
            .lock()
            .ok()
            .and_then(|m| m.get(&seq).cloned())
            .ok_or(FeedError::Status {
                url: Self::url(seq),
                status: 404,
            })
    }

    async fn fetch_state(&self) -> Result<FeedState, FeedError> {
        let latest = self
            .latest
            .or_else(|| self.segments.lock().ok().and_then(|m| m.keys().next_back().copied()))
            .ok_or(FeedError::Status {
                url: "fixture://state.yaml".to_string(),
                status: 404,
            })?;
        Ok(FeedState {
            sequence: latest,
            last_run: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_round_trips_through_decoder() {
        let payload = segment(&[
            ChangesetXml::new(5)
                .attr("user", "a \"quoted\" <name>")
                .tag("comment", "x & y"),
            ChangesetXml::new(6).discussion(),
        ]);
        let els = osmc_feed::decode_segment(&payload).unwrap();
        assert_eq!(els.len(), 2);
        assert_eq!(els[0].attribute("user"), Some("a \"quoted\" <name>"));
        assert_eq!(
            els[0].entries,
            vec![osmc_feed::NestedEntry::Tag {
                key: "comment".to_string(),
                value: "x & y".to_string()
            }]
        );
        assert_eq!(els[1].entries, vec![osmc_feed::NestedEntry::Discussion]);
    }

    #[tokio::test]
    async fn fixture_feed_answers_404_503_and_state() {
        let feed = FixtureFeed::new()
            .with_segment(3, vec![1, 2, 3])
            .with_failure(4);

        assert_eq!(feed.fetch_segment(seq(3)).await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            feed.fetch_segment(seq(4)).await,
            Err(FeedError::Status { status: 503, .. })
        ));
        assert!(matches!(
            feed.fetch_segment(seq(9)).await,
            Err(FeedError::Status { status: 404, .. })
        ));
        assert_eq!(feed.fetches(), 3);
        assert_eq!(feed.fetch_state().await.unwrap().sequence, seq(3));
    }
}
