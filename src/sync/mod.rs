pub mod engine;

use crate::models::event::{NewPollAnnouncement, PollDelta};
use crate::models::{PollPayload, PollRecord};
use crate::store::{PollStore, UpsertOutcome};
use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnapshotReport {
    pub installed: usize,
    // Entries dropped because their value wasn't a usable poll object
    pub skipped: usize,
}

// Merge policy between deltas, announcements and full snapshots
// The only code that writes to the poll store
pub struct Reconciler {
    store: Arc<PollStore>,
}

impl Reconciler {
    pub fn new(store: Arc<PollStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<PollStore> {
        &self.store
    }

    // Apply an incremental update. Unknown ids get a new record built from the
    // delta; known ids only take the mutable fields the delta carries
    pub fn apply_delta(&self, delta: PollDelta) -> UpsertOutcome {
        let PollDelta { id, fields } = delta;
        self.store.upsert(&id, |current| match current {
            Some(existing) => merge_delta(existing, &fields),
            None => {
                debug!("Delta for unseen poll {}, creating it in place", id);
                PollRecord::from_payload(id.as_str(), fields.clone(), now_millis())
            }
        })
    }

    // Install the authoritative poll set. A payload that isn't a mapping counts as empty.
    pub fn apply_snapshot(&self, payload: Value) -> SnapshotReport {
        let mut report = SnapshotReport::default();

        let entries = match payload {
            Value::Object(map) => map,
            other => {
                warn!("Poll snapshot is not a mapping ({}), treating it as empty", kind_of(&other));
                serde_json::Map::new()
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (id, value) in entries {
            match PollPayload::from_value(value) {
                Ok(payload) => records.push(PollRecord::from_payload(id, payload, 0)),
                Err(e) => {
                    warn!("Skipping malformed poll {} in snapshot: {}", id, e);
                    report.skipped += 1;
                }
            }
        }

        report.installed = records.len();
        self.store.replace_all(records);
        report
    }

    // Install a complete record for a newly published poll, overwriting whatever is there
    pub fn apply_announcement(&self, announcement: NewPollAnnouncement) -> UpsertOutcome {
        let NewPollAnnouncement { id, record } = announcement;
        let timestamp = now_millis();
        self.store
            .upsert(&id, |_| PollRecord::from_payload(id.as_str(), record.clone(), timestamp))
    }

    // Session end
    pub fn reset(&self) {
        self.store.clear();
    }
}

// Question, options, selection limit and timestamp are fixed once observed;
// an empty question or option list has not been observed yet and may be filled in.
fn merge_delta(existing: &PollRecord, fields: &PollPayload) -> PollRecord {
    let mut merged = existing.clone();

    if merged.question.is_empty() {
        if let Some(question) = &fields.question {
            merged.question = question.clone();
        }
    }
    if merged.options.is_empty() {
        if let Some(options) = &fields.options {
            merged.options = options.clone();
        }
    }
    if let Some(results) = &fields.results {
        merged.results = known_results(&merged, results);
    }
    if let Some(voters) = &fields.voters {
        merged.voters = voters.clone();
    }
    if merged.chat_id.is_none() {
        merged.chat_id = fields.chat_id.clone();
    }
    if let Some(hashes) = &fields.option_hashes {
        for (hash, text) in hashes {
            merged.option_hashes.entry(hash.clone()).or_insert_with(|| text.clone());
        }
    }
    for (key, value) in &fields.extra {
        merged.extra.insert(key.clone(), value.clone());
    }

    merged
}

// Result keys must name one of the record's options, once the options are known
fn known_results(record: &PollRecord, results: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    if record.options.is_empty() {
        return results.clone();
    }
    let (kept, dropped): (BTreeMap<String, u64>, BTreeMap<String, u64>) = results
        .iter()
        .map(|(option, votes)| (option.clone(), *votes))
        .partition(|(option, _)| record.options.contains(option));
    if !dropped.is_empty() {
        debug!(
            "Poll {}: ignoring results for unknown options {:?}",
            record.id,
            dropped.keys().collect::<Vec<_>>()
        );
    }
    kept
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reconciler() -> Reconciler {
        Reconciler::new(Arc::new(PollStore::new()))
    }

    fn delta(value: Value) -> PollDelta {
        serde_json::from_value(value).unwrap()
    }

    fn results(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn unknown_delta_creates_record_with_defaults() {
        let rec = reconciler();

        let outcome = rec.apply_delta(delta(json!({
            "id": "P1",
            "results": { "Yes": 0, "No": 0 }
        })));

        assert_eq!(outcome, UpsertOutcome::Inserted);
        let poll = rec.store().get("P1").unwrap();
        assert!(poll.options.is_empty());
        assert_eq!(poll.results, results(&[("Yes", 0), ("No", 0)]));
        assert!(poll.voters.is_empty());
        assert_eq!(poll.selectable_count, 1);
        assert!(poll.timestamp > 0);
    }

    #[test]
    fn same_delta_twice_is_idempotent() {
        let rec = reconciler();
        rec.apply_snapshot(json!({ "P1": { "question": "Q?", "options": ["A", "B"], "timestamp": 5 } }));

        let update = delta(json!({
            "id": "P1",
            "results": { "A": 1, "B": 0 },
            "voters": { "v1": ["hash-a"] }
        }));
        assert_eq!(rec.apply_delta(update.clone()), UpsertOutcome::Updated);
        let once = rec.store().snapshot();

        assert_eq!(rec.apply_delta(update), UpsertOutcome::Unchanged);
        assert_eq!(rec.store().snapshot(), once);
    }

    #[test]
    fn delta_keeps_immutable_fields() {
        let rec = reconciler();
        rec.apply_snapshot(json!({
            "P1": {
                "question": "Q?",
                "options": ["Yes", "No"],
                "results": { "Yes": 3, "No": 1 },
                "selectableCount": 0,
                "timestamp": 1000
            }
        }));

        rec.apply_delta(delta(json!({
            "pollMsgId": "P1",
            "question": "Rewritten?",
            "options": ["No", "Yes", "Maybe"],
            "results": { "Yes": 4, "No": 1 },
            "selectableCount": 3,
            "timestamp": 2000
        })));

        let poll = rec.store().get("P1").unwrap();
        assert_eq!(poll.question, "Q?");
        assert_eq!(poll.options, vec!["Yes", "No"]);
        assert_eq!(poll.results, results(&[("Yes", 4), ("No", 1)]));
        assert_eq!(poll.selectable_count, 0);
        assert_eq!(poll.timestamp, 1000);
    }

    #[test]
    fn delta_results_limited_to_known_options() {
        let rec = reconciler();
        rec.apply_snapshot(json!({
            "P1": { "question": "Q?", "options": ["Yes", "No"], "results": { "Yes": 3, "No": 1 }, "timestamp": 1000 }
        }));

        rec.apply_delta(delta(json!({ "id": "P1", "results": { "Maybe": 5 } })));
        let poll = rec.store().get("P1").unwrap();
        assert_eq!(poll.options, vec!["Yes", "No"]);
        assert!(poll.results.is_empty());

        rec.apply_delta(delta(json!({ "id": "P1", "results": { "Yes": 4, "Maybe": 5 } })));
        let poll = rec.store().get("P1").unwrap();
        assert_eq!(poll.results, results(&[("Yes", 4)]));
    }

    #[test]
    fn delta_fills_fields_not_yet_observed() {
        let rec = reconciler();
        rec.apply_delta(delta(json!({ "id": "P1", "results": { "Yes": 0 } })));

        rec.apply_delta(delta(json!({
            "id": "P1",
            "question": "Coffee?",
            "options": ["Yes", "No"],
            "optionHashes": { "h1": "Yes" }
        })));

        let poll = rec.store().get("P1").unwrap();
        assert_eq!(poll.question, "Coffee?");
        assert_eq!(poll.options, vec!["Yes", "No"]);
        assert_eq!(poll.option_hashes.get("h1").map(String::as_str), Some("Yes"));
        assert_eq!(poll.results, results(&[("Yes", 0)]));
    }

    #[test]
    fn snapshot_wins_over_earlier_deltas() {
        let rec = reconciler();
        rec.apply_delta(delta(json!({ "id": "P1", "results": { "Yes": 9 } })));
        rec.apply_delta(delta(json!({ "id": "P2", "results": { "No": 2 } })));

        let report = rec.apply_snapshot(json!({
            "P1": { "question": "Q?", "options": ["Yes", "No"], "results": { "Yes": 3, "No": 1 }, "timestamp": 1000 }
        }));

        assert_eq!(report, SnapshotReport { installed: 1, skipped: 0 });
        let all = rec.store().snapshot();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1.results, results(&[("Yes", 3), ("No", 1)]));
        assert_eq!(all[0].1.timestamp, 1000);
    }

    #[test]
    fn snapshot_then_vote_delta() {
        let rec = reconciler();
        rec.apply_snapshot(json!({
            "P1": { "question": "Q?", "options": ["Yes", "No"], "results": { "Yes": 3, "No": 1 }, "timestamp": 1000 }
        }));

        rec.apply_delta(delta(json!({ "id": "P1", "results": { "Yes": 4, "No": 1 } })));

        let poll = rec.store().get("P1").unwrap();
        assert_eq!(poll.results, results(&[("Yes", 4), ("No", 1)]));
        assert_eq!(poll.options, vec!["Yes", "No"]);
    }

    #[test]
    fn malformed_snapshot_is_soft() {
        let rec = reconciler();
        rec.apply_delta(delta(json!({ "id": "P1" })));

        let report = rec.apply_snapshot(json!(["not", "a", "map"]));
        assert_eq!(report.installed, 0);
        assert!(rec.store().is_empty());

        let report = rec.apply_snapshot(json!({
            "good": { "question": "ok" },
            "bad": "just a string",
            "worse": { "results": { "Yes": "many" } }
        }));
        assert_eq!(report, SnapshotReport { installed: 1, skipped: 2 });
        assert!(rec.store().contains("good"));
    }

    #[test]
    fn announcement_overwrites_everything() {
        let rec = reconciler();
        rec.apply_delta(delta(json!({ "id": "P7", "results": { "Old": 1 } })));

        let announcement: NewPollAnnouncement = serde_json::from_value(json!({
            "pollMsgId": "P7",
            "pollData": {
                "question": "Fresh?",
                "options": ["A", "B"],
                "results": { "A": 0, "B": 0 },
                "voters": {},
                "chatId": "group@g.us",
                "timestamp": 1234,
                "selectableCount": 0
            }
        }))
        .unwrap();
        assert_eq!(rec.apply_announcement(announcement), UpsertOutcome::Updated);

        let poll = rec.store().get("P7").unwrap();
        assert_eq!(poll.question, "Fresh?");
        assert_eq!(poll.results, results(&[("A", 0), ("B", 0)]));
        assert_eq!(poll.timestamp, 1234);
        assert_eq!(poll.chat_id.as_deref(), Some("group@g.us"));

        rec.reset();
        assert!(rec.store().is_empty());
    }
}
