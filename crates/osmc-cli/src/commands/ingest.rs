use std::sync::Arc;

use anyhow::{bail, Result};
use osmc_feed::SequenceLoader;
use osmc_runtime::{Output, RangeReport, RangeRunner};
use osmc_schemas::SequenceNumber;
use tracing::info;

use super::{http_source, Loaded};

pub struct IngestArgs {
    pub start: SequenceNumber,
    pub end: SequenceNumber,
    pub local: bool,
    pub fail_fast: bool,
}

pub async fn run_ingest(loaded: &Loaded, args: IngestArgs) -> Result<()> {
    let cfg = &loaded.ingest;
    println!("config_hash={}", loaded.config_hash);

    let source = Arc::new(http_source(&cfg.feed)?);
    let loader = SequenceLoader::new(source, cfg.paths.cache_dir.clone());
    let runner = RangeRunner::new(loader).fail_fast(cfg.run.fail_fast || args.fail_fast);

    info!(
        start = %args.start,
        end = %args.end,
        local = args.local,
        "ingest starting"
    );

    let report = if args.local {
        runner
            .run(args.start, args.end, Output::LocalCapture(&cfg.paths.output_dir))
            .await?
    } else {
        let pool = osmc_db::connect_from_env().await?;
        let store = osmc_db::PgChangesetStore::new(pool);
        runner.run(args.start, args.end, Output::Store(&store)).await?
    };

    print_report(&report);

    if !report.is_clean() {
        bail!("{} sequence(s) failed", report.failed.len());
    }
    Ok(())
}

fn print_report(report: &RangeReport) {
    println!("records={}", report.records.len());
    println!("skipped={}", report.skipped.len());
    println!("failed={}", report.failed.len());
    println!("{}", report.stats);
    if let Some((lo, hi)) = report.changeset_id_bounds() {
        println!("min_changeset_id={lo}");
        println!("max_changeset_id={hi}");
    }
    for f in &report.failed {
        println!(
            "failed_sequence={} applied={} error={}",
            f.sequence, f.applied, f.error
        );
    }
}
