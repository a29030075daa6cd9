use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use super::PresenceRecord;
use crate::store::Snapshot;

/// A presence record older than this is no longer trusted as current, even
/// if it still claims `is_typing`. Nobody retracts these explicitly.
pub const TYPING_FRESHNESS_MS: i64 = 2000;

/// Derive the set of other users typing right now from a presence
/// snapshot, keyed by user identity with display names as values.
///
/// Freshness is judged once, against `now` at snapshot-processing time;
/// staleness after that is only noticed when the next snapshot arrives.
/// The local identity is always excluded, fresh or not.
pub fn active_typists(
    snapshot: &Snapshot,
    local_id: &str,
    now: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let window = Duration::milliseconds(TYPING_FRESHNESS_MS);

    snapshot
        .documents
        .iter()
        .filter_map(PresenceRecord::from_document)
        .filter(|record| record.user_id != local_id && record.is_typing)
        .filter_map(|record| {
            let timestamp = record.timestamp?;
            if now.signed_duration_since(timestamp) < window {
                Some((record.user_id.clone(), record.display_name().to_string()))
            } else {
                None
            }
        })
        .collect()
}
