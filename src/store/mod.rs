//! Repository boundary between the engine and the remote row store
//!
//! The engine never talks to a backend directly: it consumes this capability
//! set (fetch-all, batch bookkeeping, atomic change application, history).
//! Production wires it to the remote store's RPC surface; tests use
//! [`MemoryStore`].

pub mod memory;

pub use memory::MemoryStore;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::batch::ImportBatch;
use crate::diff::ChangeKind;
use crate::schema::DatasetType;

/// A snapshot entity pulled from the store immediately before diffing.
///
/// Used only as a lookup table, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    /// Natural key (e.g. `marque|cat_fab`, or the combined CIR code).
    pub key: String,
    pub fields: HashMap<String, Value>,
}

/// One row mutation submitted to the store.
///
/// Carries the old and new values so the store can append the matching
/// history record in the same logical transaction as the row write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordChange {
    pub batch_id: Uuid,
    pub kind: ChangeKind,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub reason: String,
}

/// Audit-history record describing one applied change.
///
/// The history log is the only source of truth for rollback; no separate
/// pre-batch snapshot is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub dataset: DatasetType,
    pub change: ChangeKind,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Store capabilities consumed by the import engine.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fetch the full current snapshot for a dataset. Implementations pull
    /// in server-side pages to bound per-call payload size; the engine only
    /// ever sees the assembled whole.
    async fn fetch_all(&self, dataset: DatasetType) -> Result<Vec<StoredRecord>>;

    /// Persist a new batch record (before any row mutation).
    async fn create_batch(&self, batch: &ImportBatch) -> Result<()>;

    /// Update an existing batch record by id.
    async fn update_batch(&self, batch: &ImportBatch) -> Result<()>;

    /// Fetch a batch record by id.
    async fn fetch_batch(&self, id: Uuid) -> Result<Option<ImportBatch>>;

    /// Apply a set of row changes atomically: either every change lands
    /// together with its history entry, or nothing does. Inserts reject on
    /// an already-present key, updates and deletes on a missing key.
    async fn apply_changes(&self, dataset: DatasetType, changes: &[RecordChange]) -> Result<()>;

    /// All history entries appended for a batch, in application order.
    async fn history_for_batch(&self, batch_id: Uuid) -> Result<Vec<HistoryEntry>>;
}
