//! Pull-based cache of recent entity edits shared between dashboard panels.
//!
//! An editing panel calls [`UpdatePropagationBus::notify`]; list panels watch
//! the version counter, re-read on change and clear what they have applied.
//! There is no queue: readers only ever see the latest edit per entity.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;

pub type Patch = serde_json::Map<String, Value>;

pub const LAST_UPDATED_FIELD: &str = "lastUpdated";

#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub entity_id: String,
    pub patch: Patch,
    pub last_updated: DateTime<Utc>,
}

impl PendingUpdate {
    /// The patch with `lastUpdated` (epoch milliseconds) folded in.
    #[must_use]
    pub fn to_record(&self) -> Value {
        let mut record = self.patch.clone();
        record.insert(
            LAST_UPDATED_FIELD.to_string(),
            Value::from(self.last_updated.timestamp_millis()),
        );
        Value::Object(record)
    }
}

pub struct UpdatePropagationBus {
    entries: Mutex<HashMap<String, PendingUpdate>>,
    version: watch::Sender<u64>,
}

impl Default for UpdatePropagationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatePropagationBus {
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: Mutex::new(HashMap::new()),
            version,
        }
    }

    /// Replaces the pending update for `entity_id` and bumps the version.
    /// Returns the new version.
    pub fn notify(&self, entity_id: impl Into<String>, mut patch: Patch) -> u64 {
        let entity_id = entity_id.into();
        patch.remove(LAST_UPDATED_FIELD);

        let mut entries = self.lock();
        entries.insert(
            entity_id.clone(),
            PendingUpdate {
                entity_id: entity_id.clone(),
                patch,
                last_updated: Utc::now(),
            },
        );
        let mut version = 0;
        self.version.send_modify(|current| {
            *current += 1;
            version = *current;
        });
        drop(entries);

        tracing::debug!(entity_id = %entity_id, version, "pending update recorded");
        version
    }

    pub fn get(&self, entity_id: &str) -> Option<PendingUpdate> {
        self.lock().get(entity_id).cloned()
    }

    pub fn clear(&self, entity_id: &str) -> Option<PendingUpdate> {
        self.lock().remove(entity_id)
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Overlays pending patches onto freshly fetched records and clears the
    /// entries that were applied. Records are matched on `id_field`.
    pub fn apply_pending(&self, records: &mut [Value], id_field: &str) -> usize {
        let mut entries = self.lock();
        if entries.is_empty() {
            return 0;
        }

        let mut applied = 0;
        for record in records.iter_mut() {
            let Value::Object(fields) = record else {
                continue;
            };
            let Some(id) = fields.get(id_field).and_then(Value::as_str) else {
                continue;
            };
            let Some(update) = entries.remove(id) else {
                continue;
            };
            for (key, value) in update.patch {
                fields.insert(key, value);
            }
            applied += 1;
        }
        applied
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingUpdate>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> Patch {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn notify_then_get_returns_patch_with_timestamp() {
        let bus = UpdatePropagationBus::new();
        let before = Utc::now();

        bus.notify("c1", patch(json!({ "name": "Acme" })));

        let update = bus.get("c1").expect("pending update");
        assert_eq!(update.entity_id, "c1");
        assert_eq!(update.patch, patch(json!({ "name": "Acme" })));
        assert!(update.last_updated >= before);

        let record = update.to_record();
        assert_eq!(record["name"], json!("Acme"));
        assert_eq!(
            record[LAST_UPDATED_FIELD],
            json!(update.last_updated.timestamp_millis())
        );
    }

    #[test]
    fn second_notify_replaces_without_merging() {
        let bus = UpdatePropagationBus::new();
        bus.notify("c1", patch(json!({ "name": "Acme", "type": "vendor" })));
        bus.notify("c1", patch(json!({ "name": "Acme Corp" })));

        let update = bus.get("c1").expect("pending update");
        assert_eq!(update.patch, patch(json!({ "name": "Acme Corp" })));
        assert_eq!(bus.pending_ids(), vec!["c1".to_string()]);
    }

    #[test]
    fn clear_removes_entry() {
        let bus = UpdatePropagationBus::new();
        bus.notify("c1", patch(json!({ "name": "Acme" })));

        assert!(bus.clear("c1").is_some());
        assert_eq!(bus.get("c1"), None);
        assert_eq!(bus.clear("c1"), None);
    }

    #[test]
    fn version_increments_once_per_notify() {
        let bus = UpdatePropagationBus::new();
        assert_eq!(bus.version(), 0);

        assert_eq!(bus.notify("c1", Patch::new()), 1);
        assert_eq!(bus.notify("c1", Patch::new()), 2);
        assert_eq!(bus.notify("c2", Patch::new()), 3);
        bus.clear("c1");
        assert_eq!(bus.version(), 3);
    }

    #[test]
    fn caller_supplied_last_updated_is_replaced() {
        let bus = UpdatePropagationBus::new();
        bus.notify("c1", patch(json!({ "name": "Acme", "lastUpdated": 1 })));

        let update = bus.get("c1").expect("pending update");
        assert!(!update.patch.contains_key(LAST_UPDATED_FIELD));
        assert_ne!(update.to_record()[LAST_UPDATED_FIELD], json!(1));
    }

    #[tokio::test]
    async fn subscribers_observe_version_changes() {
        let bus = UpdatePropagationBus::new();
        let mut version = bus.subscribe();

        bus.notify("c1", patch(json!({ "name": "Acme" })));
        version.changed().await.expect("sender alive");
        assert_eq!(*version.borrow_and_update(), 1);

        bus.notify("c1", patch(json!({ "name": "Acme Corp" })));
        bus.notify("c2", patch(json!({ "name": "Globex" })));
        version.changed().await.expect("sender alive");
        assert_eq!(*version.borrow_and_update(), 3);
    }

    #[test]
    fn apply_pending_merges_into_fetched_records_and_clears_them() {
        let bus = UpdatePropagationBus::new();
        bus.notify("c1", patch(json!({ "name": "Acme Corp" })));
        bus.notify("c3", patch(json!({ "name": "Initech" })));

        let mut companies = vec![
            json!({ "_id": "c1", "name": "Acme", "type": "vendor" }),
            json!({ "_id": "c2", "name": "Globex", "type": "client" }),
        ];
        let applied = bus.apply_pending(&mut companies, "_id");

        assert_eq!(applied, 1);
        assert_eq!(
            companies[0],
            json!({ "_id": "c1", "name": "Acme Corp", "type": "vendor" })
        );
        assert_eq!(companies[1]["name"], json!("Globex"));
        assert_eq!(bus.get("c1"), None);
        assert_eq!(bus.pending_ids(), vec!["c3".to_string()]);
    }
}
