//! osmc-db
//!
//! Postgres persistence for reconciled changesets.
//!
//! [`PgChangesetStore`] implements the engine's `ChangesetStore` capability.
//! Creation is `insert .. on conflict do nothing`; updates are a single
//! conditional `update` keyed on the revision read by the engine, so concurrent
//! writers on one changeset id serialize through compare-and-swap.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use osmc_reconcile::{ChangesetStore, CreateOutcome, UpdateOutcome};
use osmc_schemas::{
    ChangesetFields, ChangesetRecord, HistoryEntry, Revision, SequenceNumber, StoredChangeset,
    Timestamp,
};
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};

pub const ENV_DB_URL: &str = "OSMC_DATABASE_URL";

/// Connect to Postgres using OSMC_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_changesets_table: bool,
    /// `None` until migrations have run.
    pub changeset_count: Option<i64>,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'changesets'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    let changeset_count = if exists {
        let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from changesets")
            .fetch_one(pool)
            .await
            .context("status count query failed")?;
        Some(n)
    } else {
        None
    };

    Ok(DbStatus {
        ok: one == 1,
        has_changesets_table: exists,
        changeset_count,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PgChangesetStore {
    pool: PgPool,
}

impl PgChangesetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    changeset_id, sequence_from,
    created_at, closed_at, open, changes_count, comments_count,
    min_lat, max_lat, min_lon, max_lon, user_name, user_id,
    comment, created_by, locale, source, imagery_used, host,
    hashtags, additional_tags, history
"#;

/// Stored timestamps are instants; a raw (preview) timestamp has no column form.
fn instant(field: &str, ts: &Option<Timestamp>) -> Result<Option<DateTime<Utc>>> {
    match ts {
        None => Ok(None),
        Some(Timestamp::Instant(dt)) => Ok(Some(*dt)),
        Some(Timestamp::Raw(raw)) => bail!("{field}: unparsed timestamp '{raw}' cannot be stored"),
    }
}

/// Binds the 19 field columns in `SELECT_COLUMNS` order, after whatever `q`
/// already carries.
fn bind_fields<'q>(
    q: Query<'q, Postgres, PgArguments>,
    f: &'q ChangesetFields,
) -> Result<Query<'q, Postgres, PgArguments>> {
    Ok(q.bind(instant("created_at", &f.created_at)?)
        .bind(instant("closed_at", &f.closed_at)?)
        .bind(f.open)
        .bind(f.changes_count)
        .bind(f.comments_count)
        .bind(f.min_lat)
        .bind(f.max_lat)
        .bind(f.min_lon)
        .bind(f.max_lon)
        .bind(f.user.as_deref())
        .bind(f.user_id)
        .bind(f.comment.as_deref())
        .bind(f.created_by.as_deref())
        .bind(f.locale.as_deref())
        .bind(f.source.as_deref())
        .bind(f.imagery_used.as_deref())
        .bind(f.host.as_deref())
        .bind(Json(&f.hashtags))
        .bind(Json(&f.additional_tags)))
}

fn row_to_stored(row: &PgRow) -> Result<StoredChangeset> {
    let seq: i64 = row.try_get("sequence_from")?;
    let sequence_from = SequenceNumber::try_from(seq)?;

    let ts = |col: &str| -> Result<Option<Timestamp>> {
        let v: Option<DateTime<Utc>> = row.try_get(col)?;
        Ok(v.map(Timestamp::Instant))
    };

    let fields = ChangesetFields {
        created_at: ts("created_at")?,
        closed_at: ts("closed_at")?,
        open: row.try_get("open")?,
        changes_count: row.try_get("changes_count")?,
        comments_count: row.try_get("comments_count")?,
        min_lat: row.try_get("min_lat")?,
        max_lat: row.try_get("max_lat")?,
        min_lon: row.try_get("min_lon")?,
        max_lon: row.try_get("max_lon")?,
        user: row.try_get("user_name")?,
        user_id: row.try_get("user_id")?,
        comment: row.try_get("comment")?,
        created_by: row.try_get("created_by")?,
        locale: row.try_get("locale")?,
        source: row.try_get("source")?,
        imagery_used: row.try_get("imagery_used")?,
        host: row.try_get("host")?,
        hashtags: row.try_get::<Json<Vec<String>>, _>("hashtags")?.0,
        additional_tags: row
            .try_get::<Json<std::collections::BTreeMap<String, String>>, _>("additional_tags")?
            .0,
    };

    let history: Json<Vec<HistoryEntry>> = row
        .try_get("history")
        .map_err(|e| anyhow!("history column does not decode: {e}"))?;

    Ok(StoredChangeset {
        record: ChangesetRecord {
            changeset_id: row.try_get("changeset_id")?,
            sequence_from,
            fields,
        },
        history: history.0,
    })
}

#[async_trait::async_trait]
impl ChangesetStore for PgChangesetStore {
    async fn find(&self, changeset_id: i64) -> Result<Option<StoredChangeset>> {
        let sql = format!("select {SELECT_COLUMNS} from changesets where changeset_id = $1");
        let row = sqlx::query(&sql)
            .bind(changeset_id)
            .fetch_optional(&self.pool)
            .await
            .context("find changeset failed")?;
        row.as_ref().map(row_to_stored).transpose()
    }

    async fn create(&self, record: &ChangesetRecord) -> Result<CreateOutcome> {
        let q = sqlx::query(
            r#"
            insert into changesets (
              changeset_id, sequence_from,
              created_at, closed_at, open, changes_count, comments_count,
              min_lat, max_lat, min_lon, max_lon, user_name, user_id,
              comment, created_by, locale, source, imagery_used, host,
              hashtags, additional_tags
            ) values (
              $1, $2,
              $3, $4, $5, $6, $7,
              $8, $9, $10, $11, $12, $13,
              $14, $15, $16, $17, $18, $19,
              $20, $21
            )
            on conflict (changeset_id) do nothing
            "#,
        )
        .bind(record.changeset_id)
        .bind(record.sequence_from.as_i64());

        let res = bind_fields(q, &record.fields)?
            .execute(&self.pool)
            .await
            .context("insert changeset failed")?;

        Ok(if res.rows_affected() == 1 {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExists
        })
    }

    async fn update(
        &self,
        record: &ChangesetRecord,
        entry: &HistoryEntry,
        expected: Revision,
    ) -> Result<UpdateOutcome> {
        let expected_len =
            i64::try_from(expected.history_len).context("history length overflows bigint")?;

        let q = sqlx::query(
            r#"
            update changesets set
              sequence_from = $2,
              created_at = $3, closed_at = $4, open = $5, changes_count = $6, comments_count = $7,
              min_lat = $8, max_lat = $9, min_lon = $10, max_lon = $11, user_name = $12, user_id = $13,
              comment = $14, created_by = $15, locale = $16, source = $17, imagery_used = $18, host = $19,
              hashtags = $20, additional_tags = $21,
              history = history || jsonb_build_array($22::jsonb),
              updated_at_utc = now()
            where changeset_id = $1
              and sequence_from = $23
              and jsonb_array_length(history)::bigint = $24
            "#,
        )
        .bind(record.changeset_id)
        .bind(record.sequence_from.as_i64());

        let res = bind_fields(q, &record.fields)?
            .bind(Json(entry))
            .bind(expected.sequence_from.as_i64())
            .bind(expected_len)
            .execute(&self.pool)
            .await
            .context("conditional changeset update failed")?;

        Ok(if res.rows_affected() == 1 {
            UpdateOutcome::Applied
        } else {
            tracing::debug!(
                changeset_id = record.changeset_id,
                "revision check rejected update"
            );
            UpdateOutcome::Conflict
        })
    }
}
