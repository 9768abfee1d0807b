//! Pure in-memory repository, the unit-test double
//!
//! Implements the same atomicity contract as the real store: every change in
//! an `apply_changes` call is precondition-checked before anything mutates,
//! so a failing call leaves records and history untouched.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::batch::ImportBatch;
use crate::diff::ChangeKind;
use crate::schema::DatasetType;

use super::{HistoryEntry, RecordChange, Repository, StoredRecord};

#[derive(Default)]
struct MemoryState {
    records: HashMap<DatasetType, HashMap<String, StoredRecord>>,
    batches: HashMap<Uuid, ImportBatch>,
    history: Vec<HistoryEntry>,
}

/// In-memory [`Repository`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_next_apply: AtomicBool,
    fail_next_update: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a dataset with existing records (test setup).
    pub fn seed(&self, dataset: DatasetType, records: Vec<StoredRecord>) {
        let mut state = self.state.lock().unwrap();
        let map = state.records.entry(dataset).or_default();
        for record in records {
            map.insert(record.key.clone(), record);
        }
    }

    /// Make the next `apply_changes` call fail before mutating anything.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    /// Make the next `update_batch` call fail without mutating the batch.
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    /// Current record count for a dataset.
    pub fn record_count(&self, dataset: DatasetType) -> usize {
        let state = self.state.lock().unwrap();
        state.records.get(&dataset).map(|m| m.len()).unwrap_or(0)
    }

    /// Fetch one record by natural key (test inspection).
    pub fn record(&self, dataset: DatasetType, key: &str) -> Option<StoredRecord> {
        let state = self.state.lock().unwrap();
        state.records.get(&dataset)?.get(key).cloned()
    }
}

fn value_to_fields(value: &Value) -> HashMap<String, Value> {
    value
        .as_object()
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

#[async_trait]
impl Repository for MemoryStore {
    async fn fetch_all(&self, dataset: DatasetType) -> Result<Vec<StoredRecord>> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<StoredRecord> = state
            .records
            .get(&dataset)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn create_batch(&self, batch: &ImportBatch) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.batches.contains_key(&batch.id) {
            bail!("batch {} already exists", batch.id);
        }
        state.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn update_batch(&self, batch: &ImportBatch) -> Result<()> {
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            bail!("injected store failure");
        }

        let mut state = self.state.lock().unwrap();
        if !state.batches.contains_key(&batch.id) {
            bail!("batch {} not found", batch.id);
        }
        state.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn fetch_batch(&self, id: Uuid) -> Result<Option<ImportBatch>> {
        let state = self.state.lock().unwrap();
        Ok(state.batches.get(&id).cloned())
    }

    async fn apply_changes(&self, dataset: DatasetType, changes: &[RecordChange]) -> Result<()> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            bail!("injected store failure");
        }

        let mut state = self.state.lock().unwrap();

        // Validate every precondition before touching anything: the whole
        // call applies or none of it does.
        {
            let records = state.records.entry(dataset).or_default();
            for change in changes {
                match change.kind {
                    ChangeKind::Insert => {
                        if records.contains_key(&change.key) {
                            bail!("insert conflict on key '{}'", change.key);
                        }
                    }
                    ChangeKind::Update | ChangeKind::Delete => {
                        if !records.contains_key(&change.key) {
                            bail!("{} on missing key '{}'", change.kind, change.key);
                        }
                    }
                }
            }
        }

        for change in changes {
            let records = state.records.entry(dataset).or_default();
            match change.kind {
                ChangeKind::Insert => {
                    let fields =
                        value_to_fields(change.new_value.as_ref().unwrap_or(&Value::Null));
                    records.insert(
                        change.key.clone(),
                        StoredRecord {
                            id: Uuid::new_v4(),
                            key: change.key.clone(),
                            fields,
                        },
                    );
                }
                ChangeKind::Update => {
                    let fields =
                        value_to_fields(change.new_value.as_ref().unwrap_or(&Value::Null));
                    if let Some(record) = records.get_mut(&change.key) {
                        record.fields = fields;
                    }
                }
                ChangeKind::Delete => {
                    records.remove(&change.key);
                }
            }

            // History append rides in the same locked section as the row
            // write, mirroring the single server-side transaction.
            state.history.push(HistoryEntry {
                id: Uuid::new_v4(),
                batch_id: change.batch_id,
                dataset,
                change: change.kind,
                key: change.key.clone(),
                old_value: change.old_value.clone(),
                new_value: change.new_value.clone(),
                reason: change.reason.clone(),
                recorded_at: Utc::now(),
            });
        }

        Ok(())
    }

    async fn history_for_batch(&self, batch_id: Uuid) -> Result<Vec<HistoryEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .history
            .iter()
            .filter(|h| h.batch_id == batch_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(kind: ChangeKind, key: &str, new_value: Option<Value>) -> RecordChange {
        RecordChange {
            batch_id: Uuid::new_v4(),
            kind,
            key: key.to_string(),
            old_value: None,
            new_value,
            reason: "import".to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_is_all_or_nothing() {
        let store = MemoryStore::new();
        let dataset = DatasetType::SegmentMapping;

        // Second change conflicts (update on missing key), so the first
        // insert must not land either.
        let changes = vec![
            change(ChangeKind::Insert, "skf|z16", Some(json!({"marque": "SKF"}))),
            change(ChangeKind::Update, "nsk|b1", Some(json!({"marque": "NSK"}))),
        ];

        assert!(store.apply_changes(dataset, &changes).await.is_err());
        assert_eq!(store.record_count(dataset), 0);
        let batch_id = changes[0].batch_id;
        assert!(store.history_for_batch(batch_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_appends_history_per_change() {
        let store = MemoryStore::new();
        let dataset = DatasetType::SegmentMapping;
        let batch_id = Uuid::new_v4();

        let mut insert = change(ChangeKind::Insert, "skf|z16", Some(json!({"marque": "SKF"})));
        insert.batch_id = batch_id;

        store.apply_changes(dataset, &[insert]).await.unwrap();

        let history = store.history_for_batch(batch_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].change, ChangeKind::Insert);
        assert_eq!(history[0].key, "skf|z16");
    }

    #[tokio::test]
    async fn test_injected_failure_mutates_nothing() {
        let store = MemoryStore::new();
        let dataset = DatasetType::SegmentMapping;
        store.fail_next_apply();

        let changes = vec![change(ChangeKind::Insert, "skf|z16", Some(json!({})))];
        assert!(store.apply_changes(dataset, &changes).await.is_err());
        assert_eq!(store.record_count(dataset), 0);

        // Next call succeeds again.
        assert!(store.apply_changes(dataset, &changes).await.is_ok());
        assert_eq!(store.record_count(dataset), 1);
    }
}
