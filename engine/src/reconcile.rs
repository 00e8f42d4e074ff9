//! Conflict resolution between a locally queued record and the server's copy.
//!
//! The sync driver calls in here once it has learned that the server already
//! holds a different version of a record a queued item touches. Everything in
//! this module is a pure function of its inputs: the same local, remote and
//! strategy always produce the same record.
//!
//! # Strategies
//!
//! - [`MergeStrategy::LocalWins`] - keep the local record
//! - [`MergeStrategy::RemoteWins`] - keep the server record
//! - [`MergeStrategy::Merge`] - server record as base, local fields layered on
//!   top, nested objects combined recursively, lists replaced wholesale
//! - [`MergeStrategy::NewestWins`] - most recent `updated_at` / `timestamp` /
//!   `created_at` wins, ties go to local (default)

use crate::{error::Result, ConflictResolution, Error};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Fields consulted, in order, to date a record for [`MergeStrategy::NewestWins`].
pub const TIME_FIELDS: [&str; 3] = ["updated_at", "timestamp", "created_at"];

/// Merge strategy for conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    LocalWins,
    RemoteWins,
    Merge,
    /// Later record wins, ties favor local (default)
    #[default]
    NewestWins,
}

impl From<ConflictResolution> for MergeStrategy {
    fn from(resolution: ConflictResolution) -> Self {
        match resolution {
            ConflictResolution::LocalWins => MergeStrategy::LocalWins,
            ConflictResolution::RemoteWins => MergeStrategy::RemoteWins,
            ConflictResolution::Merge => MergeStrategy::Merge,
        }
    }
}

/// Which side the kept record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Local,
    Remote,
    Merged,
}

/// The record to keep, plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub record: Value,
    pub outcome: Outcome,
}

impl Resolved {
    /// Whether the local change still has to reach the server.
    ///
    /// When the server copy won outright, the queued item can be dropped.
    pub fn local_survives(&self) -> bool {
        self.outcome != Outcome::Remote
    }
}

/// Resolve two versions of the same record.
pub fn resolve(local: &Value, remote: &Value, strategy: MergeStrategy) -> Value {
    resolve_detailed(local, remote, strategy).record
}

/// Resolve two versions of the same record, reporting which side won.
pub fn resolve_detailed(local: &Value, remote: &Value, strategy: MergeStrategy) -> Resolved {
    let (record, outcome) = match strategy {
        MergeStrategy::LocalWins => (local.clone(), Outcome::Local),
        MergeStrategy::RemoteWins => (remote.clone(), Outcome::Remote),
        MergeStrategy::Merge => (deep_merge(remote, local), Outcome::Merged),
        MergeStrategy::NewestWins => {
            if record_time(local) >= record_time(remote) {
                (local.clone(), Outcome::Local)
            } else {
                (remote.clone(), Outcome::Remote)
            }
        }
    };
    Resolved { record, outcome }
}

/// Resolve two typed records by way of their JSON form.
///
/// Fails if the merged value no longer decodes as `T`.
pub fn resolve_typed<T>(local: &T, remote: &T, strategy: MergeStrategy) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let to_value = |record: &T| {
        serde_json::to_value(record).map_err(|e| Error::Serialization(e.to_string()))
    };
    let resolved = resolve(&to_value(local)?, &to_value(remote)?, strategy);
    serde_json::from_value(resolved).map_err(|e| Error::InvalidRecord(e.to_string()))
}

/// Structurally merge `overlay` onto `base`.
///
/// Objects present on both sides are merged key by key; anything else
/// (primitives, lists, `null`, mismatched shapes) is taken from the overlay.
/// Keys only the base has are kept.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_fields), Value::Object(overlay_fields)) => {
            let mut merged = base_fields.clone();
            for (key, overlay_value) in overlay_fields {
                let value = match merged.get(key) {
                    Some(base_value) if base_value.is_object() && overlay_value.is_object() => {
                        deep_merge(base_value, overlay_value)
                    }
                    _ => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// The time a record was last touched.
///
/// Uses the first of [`TIME_FIELDS`] that is present and neither `null` nor
/// a blank string. Missing or unreadable values count as epoch start.
pub fn record_time(record: &Value) -> DateTime<Utc> {
    TIME_FIELDS
        .iter()
        .filter_map(|field| record.get(field))
        .find(|value| is_set(value))
        .and_then(parse_time)
        .unwrap_or_default()
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(raw) => !raw.trim().is_empty(),
        _ => true,
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_time_str(raw),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn parse_time_str(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn local_and_remote_wins() {
        let local = json!({"content": "mine"});
        let remote = json!({"content": "theirs"});

        assert_eq!(resolve(&local, &remote, MergeStrategy::LocalWins), local);
        assert_eq!(resolve(&local, &remote, MergeStrategy::RemoteWins), remote);
    }

    #[test]
    fn merge_nested() {
        let local = json!({"a": 1, "b": {"c": 1}});
        let remote = json!({"a": 2, "b": {"c": 2, "d": 3}});

        assert_eq!(
            resolve(&local, &remote, MergeStrategy::Merge),
            json!({"a": 1, "b": {"c": 1, "d": 3}})
        );
    }

    #[test]
    fn merge_treats_lists_as_atomic() {
        let local = json!({"tags": ["a"]});
        let remote = json!({"tags": ["b", "c"], "pinned": true});

        assert_eq!(
            resolve(&local, &remote, MergeStrategy::Merge),
            json!({"tags": ["a"], "pinned": true})
        );
    }

    #[test]
    fn merge_overlay_null_and_shape_changes_win() {
        let local = json!({"note": null, "meta": "flat"});
        let remote = json!({"note": "kept?", "meta": {"deep": true}});

        assert_eq!(
            resolve(&local, &remote, MergeStrategy::Merge),
            json!({"note": null, "meta": "flat"})
        );
    }

    #[test]
    fn merge_non_objects_take_overlay() {
        assert_eq!(deep_merge(&json!([1, 2]), &json!({"a": 1})), json!({"a": 1}));
        assert_eq!(deep_merge(&json!({"a": 1}), &json!(7)), json!(7));
    }

    #[test]
    fn newest_wins_by_updated_at() {
        let older = json!({"updated_at": "2024-01-01"});
        let newer = json!({"updated_at": "2024-06-01"});

        assert_eq!(resolve(&older, &newer, MergeStrategy::NewestWins), newer);
        assert_eq!(resolve(&newer, &older, MergeStrategy::NewestWins), newer);

        let tie_local = json!({"updated_at": "2024-01-01", "side": "local"});
        let tie_remote = json!({"updated_at": "2024-01-01", "side": "remote"});
        assert_eq!(
            resolve(&tie_local, &tie_remote, MergeStrategy::NewestWins),
            tie_local
        );
    }

    #[test]
    fn newest_wins_is_default() {
        assert_eq!(MergeStrategy::default(), MergeStrategy::NewestWins);
    }

    #[test]
    fn time_field_fallbacks() {
        let by_timestamp = json!({"timestamp": "2024-02-01T00:00:00.000Z"});
        let by_created = json!({"created_at": "2024-03-01T00:00:00Z"});
        assert!(record_time(&by_created) > record_time(&by_timestamp));

        // `updated_at` shadows the others even when older.
        let shadowed = json!({"updated_at": "2023-01-01", "created_at": "2025-01-01"});
        assert_eq!(
            record_time(&shadowed),
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );

        // A null field is skipped.
        let nulled = json!({"updated_at": null, "created_at": "2025-01-01"});
        assert_eq!(
            record_time(&nulled),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn blank_time_field_is_skipped() {
        let local = json!({"content": "mine", "updated_at": "", "created_at": "2025-01-01"});
        let remote = json!({"content": "theirs", "updated_at": "2024-01-01"});
        assert_eq!(
            record_time(&local),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(resolve(&local, &remote, MergeStrategy::NewestWins), local);

        let spaces = json!({"updated_at": "  ", "timestamp": 1_700_000_000_000i64});
        assert_eq!(record_time(&spaces).timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn time_formats() {
        assert_eq!(
            record_time(&json!({"updated_at": 1_704_067_200_000i64})),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            record_time(&json!({"updated_at": "2024-01-01T12:30:00"})),
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap()
        );
        assert_eq!(
            record_time(&json!({"updated_at": "2024-01-01T12:30:00+02:00"})),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn missing_or_garbage_time_is_epoch() {
        assert_eq!(record_time(&json!({})), DateTime::<Utc>::default());
        assert_eq!(record_time(&json!("not a record")), DateTime::<Utc>::default());
        assert_eq!(
            record_time(&json!({"updated_at": "yesterday"})),
            DateTime::<Utc>::default()
        );

        // Both undated: tie, local wins.
        let local = json!({"side": "local"});
        let remote = json!({"side": "remote"});
        assert_eq!(resolve(&local, &remote, MergeStrategy::NewestWins), local);
    }

    #[test]
    fn detailed_outcome() {
        let local = json!({"updated_at": "2024-01-01"});
        let remote = json!({"updated_at": "2024-06-01"});

        let resolved = resolve_detailed(&local, &remote, MergeStrategy::NewestWins);
        assert_eq!(resolved.outcome, Outcome::Remote);
        assert!(!resolved.local_survives());

        let resolved = resolve_detailed(&local, &remote, MergeStrategy::Merge);
        assert_eq!(resolved.outcome, Outcome::Merged);
        assert!(resolved.local_survives());
    }

    #[test]
    fn typed_records() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Reflection {
            id: String,
            content: String,
            #[serde(default)]
            verse_id: Option<String>,
        }

        let local = Reflection {
            id: "r1".into(),
            content: "mine".into(),
            verse_id: None,
        };
        let remote = Reflection {
            id: "r1".into(),
            content: "theirs".into(),
            verse_id: Some("Ps-46-10".into()),
        };

        // `None` serializes to null and overlays the server's value.
        let merged = resolve_typed(&local, &remote, MergeStrategy::Merge).unwrap();
        assert_eq!(merged.content, "mine");
        assert_eq!(merged.verse_id, None);

        let kept = resolve_typed(&local, &remote, MergeStrategy::RemoteWins).unwrap();
        assert_eq!(kept, remote);
    }

    #[test]
    fn strategy_from_item_policy() {
        assert_eq!(
            MergeStrategy::from(ConflictResolution::LocalWins),
            MergeStrategy::LocalWins
        );
        assert_eq!(
            MergeStrategy::from(ConflictResolution::RemoteWins),
            MergeStrategy::RemoteWins
        );
        assert_eq!(
            MergeStrategy::from(ConflictResolution::Merge),
            MergeStrategy::Merge
        );
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_json() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i32>().prop_map(|n| json!(n)),
                "[a-z]{0,8}".prop_map(Value::String),
            ];
            leaf.prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    prop::collection::btree_map("[a-d]", inner, 0..4)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        fn arb_object() -> impl Strategy<Value = Value> {
            prop::collection::btree_map("[a-f]", arb_json(), 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect()))
        }

        proptest! {
            #[test]
            fn prop_local_wins_returns_local(local in arb_json(), remote in arb_json()) {
                prop_assert_eq!(resolve(&local, &remote, MergeStrategy::LocalWins), local);
            }

            #[test]
            fn prop_remote_wins_returns_remote(local in arb_json(), remote in arb_json()) {
                prop_assert_eq!(resolve(&local, &remote, MergeStrategy::RemoteWins), remote);
            }

            #[test]
            fn prop_merge_keeps_every_key(local in arb_object(), remote in arb_object()) {
                let merged = resolve(&local, &remote, MergeStrategy::Merge);
                let merged = merged.as_object().unwrap();

                for key in remote.as_object().unwrap().keys() {
                    prop_assert!(merged.contains_key(key));
                }
                for (key, value) in local.as_object().unwrap() {
                    // Non-object overlay leaves always win.
                    if !value.is_object() {
                        prop_assert_eq!(&merged[key], value);
                    }
                }
            }

            #[test]
            fn prop_merge_with_self_is_identity(record in arb_object()) {
                prop_assert_eq!(resolve(&record, &record, MergeStrategy::Merge), record);
            }

            #[test]
            fn prop_newest_wins_picks_later(a in 0i64..4_000_000_000_000, b in 0i64..4_000_000_000_000) {
                let local = json!({"updated_at": a, "side": "local"});
                let remote = json!({"updated_at": b, "side": "remote"});
                let winner = resolve(&local, &remote, MergeStrategy::NewestWins);
                let expected = if a >= b { &local } else { &remote };
                prop_assert_eq!(&winner, expected);
            }
        }
    }
}
