//! Changeset formatter: one [`RawElement`] → one canonical [`ChangesetRecord`].
//!
//! ## Attribute table
//!
//! | Attribute                       | Field            | Coercion              |
//! |---------------------------------|------------------|-----------------------|
//! | `id`                            | `changeset_id`   | integer (required)    |
//! | `created_at`, `closed_at`       | same             | `%Y-%m-%dT%H:%M:%SZ`  |
//! | `open`                          | `open`           | `true` (any case)     |
//! | `num_changes`, `changes_count`  | `changes_count`  | integer               |
//! | `comments_count`                | `comments_count` | integer               |
//! | `user`                          | `user`           | verbatim              |
//! | `uid`                           | `user_id`        | integer               |
//! | `min_lat` `max_lat` `min_lon` `max_lon` | same     | float                 |
//!
//! Anything else is reported and dropped. A known attribute whose value does not
//! coerce is reported and left absent.

use chrono::{NaiveDateTime, TimeZone, Utc};
use osmc_schemas::{ChangesetFields, ChangesetRecord, SequenceNumber, Timestamp};
use tracing::{debug, warn};

use crate::decoder::{NestedEntry, RawElement};

/// Feed timestamp literal format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Tag key whose value is a `;`-delimited list accumulated across occurrences.
pub const HASHTAGS_KEY: &str = "hashtags";

/// Whether the formatted record is headed for the store or for a local capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Timestamps parsed into UTC instants.
    Persist,
    /// Timestamps kept as the raw feed strings.
    Preview,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("changeset element has no id attribute")]
    MissingId,
    #[error("changeset id '{0}' is not an integer")]
    InvalidId(String),
}

/// What the formatter dropped or could not interpret for one element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatReport {
    pub unknown_attributes: usize,
    pub unknown_entries: usize,
    pub invalid_values: usize,
    pub discussions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Formatted {
    pub record: ChangesetRecord,
    pub report: FormatReport,
}

#[derive(Clone, Copy)]
enum Attr {
    CreatedAt,
    ClosedAt,
    Open,
    ChangesCount,
    CommentsCount,
    User,
    UserId,
    MinLat,
    MaxLat,
    MinLon,
    MaxLon,
}

fn lookup_attr(name: &str) -> Option<Attr> {
    Some(match name {
        "created_at" => Attr::CreatedAt,
        "closed_at" => Attr::ClosedAt,
        "open" => Attr::Open,
        "num_changes" | "changes_count" => Attr::ChangesCount,
        "comments_count" => Attr::CommentsCount,
        "user" => Attr::User,
        "uid" => Attr::UserId,
        "min_lat" => Attr::MinLat,
        "max_lat" => Attr::MaxLat,
        "min_lon" => Attr::MinLon,
        "max_lon" => Attr::MaxLon,
        _ => return None,
    })
}

/// Format one raw element observed in sequence `sequence`.
pub fn format_changeset(
    raw: &RawElement,
    sequence: SequenceNumber,
    mode: FormatMode,
) -> Result<Formatted, FormatError> {
    let id_raw = raw.id().ok_or(FormatError::MissingId)?;
    let changeset_id: i64 = id_raw
        .trim()
        .parse()
        .map_err(|_| FormatError::InvalidId(id_raw.to_string()))?;

    let mut fields = ChangesetFields::default();
    let mut report = FormatReport::default();

    for (name, value) in &raw.attributes {
        if name == "id" {
            continue;
        }
        let Some(attr) = lookup_attr(name) else {
            report.unknown_attributes += 1;
            warn!(
                event = "unknown_attribute",
                sequence = %sequence,
                changeset_id,
                attribute = %name,
                "changeset attribute not known"
            );
            continue;
        };

        if !apply_attr(&mut fields, attr, value, mode) {
            report.invalid_values += 1;
            warn!(
                event = "invalid_attribute_value",
                sequence = %sequence,
                changeset_id,
                attribute = %name,
                value = %value,
                "changeset attribute value could not be coerced"
            );
        }
    }

    for entry in &raw.entries {
        match entry {
            NestedEntry::Tag { key, value } => apply_tag(&mut fields, key, value),
            NestedEntry::Discussion => {
                report.discussions += 1;
                debug!(sequence = %sequence, changeset_id, "discussion entry not modeled");
            }
            NestedEntry::Other(kind) => {
                report.unknown_entries += 1;
                warn!(
                    event = "unknown_element_kind",
                    sequence = %sequence,
                    changeset_id,
                    element = %kind,
                    "nested element is neither <tag> nor <discussion>"
                );
            }
        }
    }

    Ok(Formatted {
        record: ChangesetRecord {
            changeset_id,
            sequence_from: sequence,
            fields,
        },
        report,
    })
}

/// Returns false when the value does not coerce; the field is then left absent.
fn apply_attr(fields: &mut ChangesetFields, attr: Attr, value: &str, mode: FormatMode) -> bool {
    match attr {
        Attr::CreatedAt => set(&mut fields.created_at, parse_timestamp(value, mode)),
        Attr::ClosedAt => set(&mut fields.closed_at, parse_timestamp(value, mode)),
        Attr::Open => set(&mut fields.open, Some(value.trim().eq_ignore_ascii_case("true"))),
        Attr::ChangesCount => set(&mut fields.changes_count, value.trim().parse().ok()),
        Attr::CommentsCount => set(&mut fields.comments_count, value.trim().parse().ok()),
        Attr::User => set(&mut fields.user, Some(value.to_string())),
        Attr::UserId => set(&mut fields.user_id, value.trim().parse().ok()),
        Attr::MinLat => set(&mut fields.min_lat, parse_coord(value)),
        Attr::MaxLat => set(&mut fields.max_lat, parse_coord(value)),
        Attr::MinLon => set(&mut fields.min_lon, parse_coord(value)),
        Attr::MaxLon => set(&mut fields.max_lon, parse_coord(value)),
    }
}

fn parse_coord(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = Some(v);
            true
        }
        None => false,
    }
}

pub fn parse_timestamp(value: &str, mode: FormatMode) -> Option<Timestamp> {
    match mode {
        FormatMode::Preview => Some(Timestamp::Raw(value.to_string())),
        FormatMode::Persist => NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| Timestamp::Instant(Utc.from_utc_datetime(&naive))),
    }
}

fn apply_tag(fields: &mut ChangesetFields, key: &str, value: &str) {
    match key {
        "comment" => fields.comment = Some(value.to_string()),
        "created_by" => fields.created_by = Some(value.to_string()),
        "locale" => fields.locale = Some(value.to_string()),
        "source" => fields.source = Some(value.to_string()),
        "imagery_used" => fields.imagery_used = Some(value.to_string()),
        "host" => fields.host = Some(value.to_string()),
        HASHTAGS_KEY => {
            for tag in value.split(';').map(str::trim).filter(|t| !t.is_empty()) {
                if !fields.hashtags.iter().any(|h| h == tag) {
                    fields.hashtags.push(tag.to_string());
                }
            }
        }
        _ => {
            fields
                .additional_tags
                .insert(key.to_string(), value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n).unwrap()
    }

    fn element(attrs: &[(&str, &str)], tags: &[(&str, &str)]) -> RawElement {
        RawElement {
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            entries: tags
                .iter()
                .map(|(k, v)| NestedEntry::Tag {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn coerces_attributes_and_stamps_sequence() {
        let raw = element(
            &[
                ("id", "500"),
                ("open", "TRUE"),
                ("changes_count", "3"),
                ("comments_count", "0"),
                ("created_at", "2021-11-18T06:17:42Z"),
                ("uid", "12026398"),
                ("user", "mapper"),
                ("min_lat", "15.3384649"),
                ("max_lon", "-91.8694203"),
            ],
            &[("comment", "fix road")],
        );

        let out = format_changeset(&raw, seq(100), FormatMode::Persist).unwrap();
        let r = out.record;
        assert_eq!(r.changeset_id, 500);
        assert_eq!(r.sequence_from, seq(100));
        assert_eq!(r.fields.open, Some(true));
        assert_eq!(r.fields.changes_count, Some(3));
        assert_eq!(r.fields.comments_count, Some(0));
        assert_eq!(r.fields.user_id, Some(12_026_398));
        assert_eq!(r.fields.user.as_deref(), Some("mapper"));
        assert_eq!(r.fields.min_lat, Some(15.3384649));
        assert_eq!(r.fields.max_lon, Some(-91.8694203));
        assert_eq!(r.fields.comment.as_deref(), Some("fix road"));
        assert_eq!(
            r.fields.created_at,
            Some(Timestamp::Instant(
                Utc.with_ymd_and_hms(2021, 11, 18, 6, 17, 42).unwrap()
            ))
        );
        assert_eq!(r.fields.closed_at, None);
        assert_eq!(out.report, FormatReport::default());
    }

    #[test]
    fn open_is_false_for_anything_but_true() {
        for v in ["false", "yes", "1", ""] {
            let raw = element(&[("id", "1"), ("open", v)], &[]);
            let r = format_changeset(&raw, seq(1), FormatMode::Persist).unwrap().record;
            assert_eq!(r.fields.open, Some(false), "open={v:?}");
        }
    }

    #[test]
    fn num_changes_maps_to_changes_count() {
        let raw = element(&[("id", "1"), ("num_changes", "17")], &[]);
        let r = format_changeset(&raw, seq(1), FormatMode::Persist).unwrap().record;
        assert_eq!(r.fields.changes_count, Some(17));
    }

    #[test]
    fn preview_keeps_raw_timestamps() {
        let raw = element(&[("id", "1"), ("closed_at", "2021-11-18T06:17:44Z")], &[]);
        let r = format_changeset(&raw, seq(1), FormatMode::Preview).unwrap().record;
        assert_eq!(
            r.fields.closed_at,
            Some(Timestamp::Raw("2021-11-18T06:17:44Z".to_string()))
        );
    }

    #[test]
    fn unknown_attributes_and_entries_are_reported_not_fatal() {
        let mut raw = element(&[("id", "9"), ("flavour", "vanilla")], &[("source", "survey")]);
        raw.entries.push(NestedEntry::Other("note".to_string()));
        raw.entries.push(NestedEntry::Discussion);

        let out = format_changeset(&raw, seq(3), FormatMode::Persist).unwrap();
        assert_eq!(out.report.unknown_attributes, 1);
        assert_eq!(out.report.unknown_entries, 1);
        assert_eq!(out.report.discussions, 1);
        assert_eq!(out.record.fields.source.as_deref(), Some("survey"));
        assert!(out.record.fields.additional_tags.is_empty());
    }

    #[test]
    fn invalid_known_value_is_left_absent() {
        let raw = element(
            &[("id", "9"), ("changes_count", "many"), ("created_at", "yesterday")],
            &[],
        );
        let out = format_changeset(&raw, seq(3), FormatMode::Persist).unwrap();
        assert_eq!(out.report.invalid_values, 2);
        assert_eq!(out.record.fields.changes_count, None);
        assert_eq!(out.record.fields.created_at, None);
    }

    #[test]
    fn hashtags_union_across_occurrences() {
        let raw = element(
            &[("id", "1")],
            &[
                ("hashtags", "#hotosm-1;#missingmaps"),
                ("hashtags", "#missingmaps;;#mapathon "),
            ],
        );
        let r = format_changeset(&raw, seq(1), FormatMode::Persist).unwrap().record;
        assert_eq!(r.fields.hashtags, vec!["#hotosm-1", "#missingmaps", "#mapathon"]);
    }

    #[test]
    fn hashtags_do_not_carry_over_between_parses() {
        let raw = element(&[("id", "1")], &[("hashtags", "#a")]);
        let first = format_changeset(&raw, seq(1), FormatMode::Persist).unwrap().record;
        let second = format_changeset(&raw, seq(1), FormatMode::Persist).unwrap().record;
        assert_eq!(first.fields.hashtags, vec!["#a"]);
        assert_eq!(second.fields.hashtags, vec!["#a"]);
    }

    #[test]
    fn other_tags_go_to_additional_tags_last_write_wins() {
        let raw = element(
            &[("id", "1")],
            &[("changesets_count", "73"), ("review_requested", "no"), ("changesets_count", "74")],
        );
        let r = format_changeset(&raw, seq(1), FormatMode::Persist).unwrap().record;
        assert_eq!(r.fields.additional_tags.len(), 2);
        assert_eq!(r.fields.additional_tags["changesets_count"], "74");
    }

    #[test]
    fn missing_or_bad_id_is_error() {
        let raw = element(&[("open", "true")], &[]);
        assert_eq!(
            format_changeset(&raw, seq(1), FormatMode::Persist).unwrap_err(),
            FormatError::MissingId
        );
        let raw = element(&[("id", "abc")], &[]);
        assert_eq!(
            format_changeset(&raw, seq(1), FormatMode::Persist).unwrap_err(),
            FormatError::InvalidId("abc".to_string())
        );
    }
}
