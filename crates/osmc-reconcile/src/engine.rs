use anyhow::{bail, Context, Result};
use osmc_schemas::{ChangesetFields, ChangesetRecord, HistoryEntry, StoredChangeset};
use serde::Serialize;
use tracing::{debug, info};

use crate::store::{ChangesetStore, CreateOutcome, UpdateOutcome};
use crate::{FieldChange, ReconcileOutcome, ReconcilePlan, Reconciled};

/// Read-plan-write rounds before a contended changeset is reported as an error.
pub const MAX_RECONCILE_ATTEMPTS: usize = 8;

fn render<T: Serialize>(v: &T) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "<unrenderable>".to_string())
}

/// Attribute-derived field: compared only when the incoming record carries it.
fn merge_present<T>(
    field: &'static str,
    current: &mut Option<T>,
    incoming: &Option<T>,
    changes: &mut Vec<FieldChange>,
) where
    T: PartialEq + Clone + Serialize,
{
    if let Some(value) = incoming {
        if current.as_ref() != Some(value) {
            changes.push(FieldChange {
                field,
                before: render(current),
                after: render(incoming),
            });
            *current = Some(value.clone());
        }
    }
}

/// Tag-derived field: the tag set is published whole, so absence is a value too.
fn merge_whole<T>(field: &'static str, current: &mut T, incoming: &T, changes: &mut Vec<FieldChange>)
where
    T: PartialEq + Clone + Serialize,
{
    if current != incoming {
        changes.push(FieldChange {
            field,
            before: render(current),
            after: render(incoming),
        });
        *current = incoming.clone();
    }
}

/// Overwrite every differing field of `current` with `incoming`, in a fixed order.
fn merge_fields(current: &mut ChangesetFields, incoming: &ChangesetFields) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    merge_present("created_at", &mut current.created_at, &incoming.created_at, &mut changes);
    merge_present("closed_at", &mut current.closed_at, &incoming.closed_at, &mut changes);
    merge_present("open", &mut current.open, &incoming.open, &mut changes);
    merge_present("changes_count", &mut current.changes_count, &incoming.changes_count, &mut changes);
    merge_present("comments_count", &mut current.comments_count, &incoming.comments_count, &mut changes);
    merge_present("min_lat", &mut current.min_lat, &incoming.min_lat, &mut changes);
    merge_present("max_lat", &mut current.max_lat, &incoming.max_lat, &mut changes);
    merge_present("min_lon", &mut current.min_lon, &incoming.min_lon, &mut changes);
    merge_present("max_lon", &mut current.max_lon, &incoming.max_lon, &mut changes);
    merge_present("user", &mut current.user, &incoming.user, &mut changes);
    merge_present("user_id", &mut current.user_id, &incoming.user_id, &mut changes);

    merge_whole("comment", &mut current.comment, &incoming.comment, &mut changes);
    merge_whole("created_by", &mut current.created_by, &incoming.created_by, &mut changes);
    merge_whole("locale", &mut current.locale, &incoming.locale, &mut changes);
    merge_whole("source", &mut current.source, &incoming.source, &mut changes);
    merge_whole("imagery_used", &mut current.imagery_used, &incoming.imagery_used, &mut changes);
    merge_whole("host", &mut current.host, &incoming.host, &mut changes);
    merge_whole("hashtags", &mut current.hashtags, &incoming.hashtags, &mut changes);
    merge_whole(
        "additional_tags",
        &mut current.additional_tags,
        &incoming.additional_tags,
        &mut changes,
    );

    changes
}

/// Decide what to do with `incoming` given the stored state.
///
/// `incoming.sequence_from == current.sequence_from` is current data, not stale.
/// A strictly newer sequence always takes authority, even when every field
/// matches, so the set of recorded sequences does not depend on arrival order.
pub fn plan(current: Option<&StoredChangeset>, incoming: &ChangesetRecord) -> ReconcilePlan {
    let Some(current) = current else {
        return ReconcilePlan::Insert;
    };

    if incoming.sequence_from >= current.record.sequence_from {
        let mut next = current.record.clone();
        let changes = merge_fields(&mut next.fields, &incoming.fields);
        if changes.is_empty() && incoming.sequence_from == current.record.sequence_from {
            return ReconcilePlan::Unchanged;
        }
        next.sequence_from = incoming.sequence_from;
        ReconcilePlan::Apply {
            changes,
            snapshot: HistoryEntry::superseded(&current.record),
            next,
        }
    } else if current.history_has_sequence(incoming.sequence_from) {
        ReconcilePlan::AlreadyFiled
    } else {
        ReconcilePlan::FileStale {
            entry: HistoryEntry::stale(incoming),
        }
    }
}

/// Merge one formatted record into `store`.
///
/// Returns the input record with the outcome. Writes happen only when the plan
/// changes or appends something. A revision conflict re-reads and re-plans.
pub async fn reconcile(store: &dyn ChangesetStore, record: ChangesetRecord) -> Result<Reconciled> {
    let id = record.changeset_id;

    for attempt in 1..=MAX_RECONCILE_ATTEMPTS {
        let current = store
            .find(id)
            .await
            .with_context(|| format!("find changeset {id}"))?;
        let expected = current.as_ref().map(StoredChangeset::revision);

        let outcome = match (plan(current.as_ref(), &record), expected) {
            (ReconcilePlan::Insert, _) => {
                match store
                    .create(&record)
                    .await
                    .with_context(|| format!("create changeset {id}"))?
                {
                    CreateOutcome::Created => {
                        debug!(
                            event = "changeset_created",
                            changeset_id = id,
                            sequence = %record.sequence_from,
                            "changeset created"
                        );
                        ReconcileOutcome::Inserted
                    }
                    CreateOutcome::AlreadyExists => {
                        debug!(changeset_id = id, attempt, "create raced; re-reading");
                        continue;
                    }
                }
            }

            (ReconcilePlan::Apply { changes, snapshot, next }, Some(expected)) => {
                match store
                    .update(&next, &snapshot, expected)
                    .await
                    .with_context(|| format!("update changeset {id}"))?
                {
                    UpdateOutcome::Applied => {
                        for c in &changes {
                            debug!(
                                event = "field_changed",
                                changeset_id = id,
                                field = c.field,
                                before = %c.before,
                                after = %c.after,
                                "changeset field changed"
                            );
                        }
                        ReconcileOutcome::Updated {
                            previous: expected.sequence_from,
                            changes,
                        }
                    }
                    UpdateOutcome::Conflict => {
                        debug!(changeset_id = id, attempt, "revision moved; re-planning");
                        continue;
                    }
                }
            }

            (ReconcilePlan::FileStale { entry }, Some(expected)) => {
                let authority = expected.sequence_from;
                let Some(current) = current.as_ref() else {
                    bail!("changeset {id}: stale plan without stored state");
                };
                match store
                    .update(&current.record, &entry, expected)
                    .await
                    .with_context(|| format!("file stale record for changeset {id}"))?
                {
                    UpdateOutcome::Applied => {
                        info!(
                            event = "stale_record_filed",
                            changeset_id = id,
                            sequence = %record.sequence_from,
                            authority = %authority,
                            "older sequence filed in history"
                        );
                        ReconcileOutcome::StaleFiled { authority }
                    }
                    UpdateOutcome::Conflict => {
                        debug!(changeset_id = id, attempt, "revision moved; re-planning");
                        continue;
                    }
                }
            }

            (ReconcilePlan::AlreadyFiled, Some(expected)) => {
                debug!(
                    event = "stale_record_already_filed",
                    changeset_id = id,
                    sequence = %record.sequence_from,
                    "history already holds this sequence"
                );
                ReconcileOutcome::StaleAlreadyFiled {
                    authority: expected.sequence_from,
                }
            }

            (ReconcilePlan::Unchanged, _) => ReconcileOutcome::Unchanged,

            (_, None) => bail!("changeset {id}: plan requires stored state"),
        };

        return Ok(Reconciled { record, outcome });
    }

    bail!("changeset {id}: gave up after {MAX_RECONCILE_ATTEMPTS} conflicting attempts")
}
