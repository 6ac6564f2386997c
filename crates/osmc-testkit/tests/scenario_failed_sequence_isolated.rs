use std::sync::Arc;

use anyhow::{bail, Result};
use osmc_feed::SequenceLoader;
use osmc_reconcile::{ChangesetStore, CreateOutcome, MemoryStore, UpdateOutcome};
use osmc_runtime::{Output, RangeRunner};
use osmc_schemas::{ChangesetRecord, HistoryEntry, Revision, StoredChangeset};
use osmc_testkit::{segment, seq, ChangesetXml, FixtureFeed};

fn feed() -> Arc<FixtureFeed> {
    Arc::new(
        FixtureFeed::new()
            .with_segment(10, segment(&[ChangesetXml::new(1)]))
            .with_failure(11)
            .with_segment(12, b"not a gzip stream".to_vec())
            .with_segment(
                13,
                segment(&[
                    ChangesetXml::without_id().attr("open", "true"),
                    ChangesetXml::new(3).attr("colour", "red"),
                ]),
            ),
    )
}

#[tokio::test]
async fn scenario_bad_sequences_are_reported_and_run_continues() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = MemoryStore::new();
    let runner = RangeRunner::new(SequenceLoader::new(feed(), cache.path()));

    let report = runner.run(seq(10), seq(13), Output::Store(&store)).await?;

    let failed: Vec<u32> = report.failed.iter().map(|f| f.sequence.get()).collect();
    assert_eq!(failed, vec![11, 12]);
    assert!(report.failed.iter().all(|f| f.applied == 0));
    assert!(report.failed[0].error.contains("503"), "{}", report.failed[0].error);
    assert!(report.failed[1].error.contains("decode"), "{}", report.failed[1].error);

    assert_eq!(report.changeset_id_bounds(), Some((1, 3)));
    assert_eq!(report.stats.skipped_elements, 1);
    assert_eq!(report.stats.unknown_attribute, 1);
    assert_eq!(store.len(), 2);

    // Fetched-but-corrupt bytes stay cached; the failed fetch leaves nothing.
    assert!(cache.path().join("12.osm.gz").is_file());
    assert!(!cache.path().join("11.osm.gz").exists());
    Ok(())
}

#[tokio::test]
async fn scenario_fail_fast_stops_at_first_failure() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = MemoryStore::new();
    let runner = RangeRunner::new(SequenceLoader::new(feed(), cache.path())).fail_fast(true);

    let err = runner
        .run(seq(10), seq(13), Output::Store(&store))
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("sequence 11"));
    assert_eq!(store.len(), 1, "sequence 10 was processed before the failure");
    assert!(store.get(3).is_none());
    Ok(())
}

/// Memory store that refuses to create one changeset id.
struct RejectingStore {
    inner: MemoryStore,
    reject: i64,
}

#[async_trait::async_trait]
impl ChangesetStore for RejectingStore {
    async fn find(&self, changeset_id: i64) -> Result<Option<StoredChangeset>> {
        self.inner.find(changeset_id).await
    }

    async fn create(&self, record: &ChangesetRecord) -> Result<CreateOutcome> {
        if record.changeset_id == self.reject {
            bail!("connection reset while creating {}", record.changeset_id);
        }
        self.inner.create(record).await
    }

    async fn update(
        &self,
        record: &ChangesetRecord,
        entry: &HistoryEntry,
        expected: Revision,
    ) -> Result<UpdateOutcome> {
        self.inner.update(record, entry, expected).await
    }
}

#[tokio::test]
async fn scenario_store_failure_mid_segment_reports_applied_records() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let feed = Arc::new(FixtureFeed::new().with_segment(
        20,
        segment(&[
            ChangesetXml::new(1),
            ChangesetXml::new(2),
            ChangesetXml::new(3),
            ChangesetXml::new(4),
        ]),
    ));
    let store = RejectingStore {
        inner: MemoryStore::new(),
        reject: 3,
    };
    let runner = RangeRunner::new(SequenceLoader::new(feed, cache.path()));

    let report = runner.run(seq(20), seq(20), Output::Store(&store)).await?;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].sequence, seq(20));
    assert_eq!(report.failed[0].applied, 2);
    assert!(report.failed[0].error.contains("connection reset"), "{}", report.failed[0].error);

    // Records and counters agree with what actually reached the store.
    let ids: Vec<i64> = report.records.iter().map(|r| r.changeset_id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(report.stats.inserted, 2);
    assert_eq!(store.inner.len(), 2);
    assert!(store.inner.get(4).is_none());
    Ok(())
}
