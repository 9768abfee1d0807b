//! Import batch lifecycle: create, commit, rollback
//!
//! A batch is the unit of auditability and the unit of undo. It is persisted
//! `Processing` before any row mutation, finalized exactly once to
//! `Completed` or `Failed`, and a completed batch can later be reverted to
//! its pre-import state by replaying its history log in reverse.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::diff::{ChangeKind, DiffReport, DiffSummary};
use crate::error::ImportError;
use crate::normalize::ParseResult;
use crate::schema::DatasetType;
use crate::store::{RecordChange, Repository};

/// Lifecycle states of an import batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    RolledBack,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::RolledBack => "rolled_back",
        };
        write!(f, "{}", label)
    }
}

impl BatchStatus {
    /// Legal lifecycle transitions. `Failed` is terminal.
    pub fn can_transition_to(&self, to: BatchStatus) -> bool {
        matches!(
            (self, to),
            (BatchStatus::Pending, BatchStatus::Processing)
                | (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
                | (BatchStatus::Completed, BatchStatus::RolledBack)
        )
    }
}

/// Persisted record of one import attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub dataset: DatasetType,
    pub source_filename: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Physical data lines in the uploaded sheet.
    pub total_lines: u32,
    /// Lines that produced valid rows.
    pub processed_lines: u32,
    /// Lines skipped with a reason.
    pub error_lines: u32,
    pub created_count: u32,
    pub updated_count: u32,
    pub skipped_count: u32,
    pub diff: Option<DiffSummary>,
    /// Column mapping used for this import (observed header -> field).
    pub column_mapping: Option<HashMap<String, String>>,
}

impl ImportBatch {
    /// New batch in `Processing`, carrying the parse counts.
    pub fn new(
        dataset: DatasetType,
        source_filename: impl Into<String>,
        parse: &ParseResult,
        column_mapping: Option<HashMap<String, String>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            dataset,
            source_filename: source_filename.into(),
            status: BatchStatus::Processing,
            created_at: now,
            updated_at: now,
            total_lines: parse.total_lines as u32,
            processed_lines: parse.valid_lines as u32,
            error_lines: parse.skipped_lines as u32,
            created_count: 0,
            updated_count: 0,
            skipped_count: parse.skipped_lines as u32,
            diff: None,
            column_mapping,
        }
    }

    /// Move to a new status, rejecting illegal transitions.
    pub fn transition(&mut self, to: BatchStatus) -> Result<(), ImportError> {
        if !self.status.can_transition_to(to) {
            return Err(ImportError::InvalidBatchTransition {
                batch_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether this batch applied any row changes at all.
    fn had_changes(&self) -> bool {
        self.diff
            .map(|d| d.added + d.updated + d.removed > 0)
            .unwrap_or(false)
    }
}

fn fields_to_value(fields: &HashMap<String, Value>) -> Value {
    Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn count_kind(changes: &[RecordChange], kind: ChangeKind) -> u32 {
    changes.iter().filter(|c| c.kind == kind).count() as u32
}

/// Wraps the commit step for traceability and reversibility.
pub struct BatchManager {
    store: Arc<dyn Repository>,
}

impl BatchManager {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    /// Persist a new batch record before any row mutation, so even a
    /// mid-commit crash leaves an auditable record.
    pub async fn create(
        &self,
        dataset: DatasetType,
        source_filename: &str,
        parse: &ParseResult,
        column_mapping: Option<HashMap<String, String>>,
    ) -> Result<ImportBatch, ImportError> {
        let batch = ImportBatch::new(dataset, source_filename, parse, column_mapping);
        self.store.create_batch(&batch).await?;
        log::info!(
            "Created batch {} for {} ('{}'): {} lines, {} valid",
            batch.id,
            dataset,
            source_filename,
            batch.total_lines,
            batch.processed_lines
        );
        Ok(batch)
    }

    /// Apply the diff's changes as one atomic store call, then finalize the
    /// batch. On any failure the batch is finalized `Failed` and the error
    /// surfaces with the batch id attached; it is never left `Processing`.
    pub async fn commit(
        &self,
        batch: &mut ImportBatch,
        report: &DiffReport,
    ) -> Result<(), ImportError> {
        let changes: Vec<RecordChange> = report
            .changes
            .iter()
            .map(|change| RecordChange {
                batch_id: batch.id,
                kind: change.kind,
                key: change.key.clone(),
                old_value: change.before.as_ref().map(fields_to_value),
                new_value: change.after.as_ref().map(fields_to_value),
                reason: format!("import '{}'", batch.source_filename),
            })
            .collect();

        match self.store.apply_changes(batch.dataset, &changes).await {
            Ok(()) => {
                // Counts follow the applied plan, which collapses duplicate
                // incoming keys; the summary keeps the per-row counts.
                batch.created_count = count_kind(&changes, ChangeKind::Insert);
                batch.updated_count = count_kind(&changes, ChangeKind::Update);
                batch.diff = Some(report.summary);
                batch.transition(BatchStatus::Completed)?;
                if let Err(source) = self.store.update_batch(batch).await {
                    // Row changes already landed but the stored batch still
                    // reads processing; carry the id so the caller can
                    // reconcile via fetch_batch.
                    return Err(ImportError::CommitFailed {
                        batch_id: batch.id,
                        source,
                    });
                }
                log::info!(
                    "Batch {} completed: {} created, {} updated, {} removed",
                    batch.id,
                    report.summary.added,
                    report.summary.updated,
                    report.summary.removed
                );
                Ok(())
            }
            Err(source) => {
                batch.transition(BatchStatus::Failed)?;
                if let Err(update_err) = self.store.update_batch(batch).await {
                    log::error!(
                        "Batch {} failed and could not be finalized: {}",
                        batch.id,
                        update_err
                    );
                }
                Err(ImportError::CommitFailed {
                    batch_id: batch.id,
                    source,
                })
            }
        }
    }

    /// Revert a completed batch by replaying its history in reverse.
    ///
    /// Atomic: either all rows revert or none do. On failure the batch stays
    /// `Completed` so a human can investigate instead of having an
    /// inconsistent state reported as reverted.
    pub async fn rollback(&self, batch_id: Uuid) -> Result<ImportBatch, ImportError> {
        let mut batch = self
            .store
            .fetch_batch(batch_id)
            .await?
            .ok_or_else(|| ImportError::Store(anyhow::anyhow!("batch {} not found", batch_id)))?;

        if batch.status != BatchStatus::Completed {
            return Err(ImportError::InvalidBatchTransition {
                batch_id,
                from: batch.status,
                to: BatchStatus::RolledBack,
            });
        }

        let history = self.store.history_for_batch(batch_id).await?;
        if history.is_empty() && batch.had_changes() {
            return Err(ImportError::MissingHistory(batch_id));
        }

        let inverse: Vec<RecordChange> = history
            .iter()
            .rev()
            .map(|entry| {
                let (kind, old_value, new_value) = match entry.change {
                    ChangeKind::Insert => {
                        (ChangeKind::Delete, entry.new_value.clone(), None)
                    }
                    ChangeKind::Update => {
                        (ChangeKind::Update, entry.new_value.clone(), entry.old_value.clone())
                    }
                    ChangeKind::Delete => {
                        (ChangeKind::Insert, None, entry.old_value.clone())
                    }
                };
                RecordChange {
                    batch_id,
                    kind,
                    key: entry.key.clone(),
                    old_value,
                    new_value,
                    reason: format!("rollback of batch {}", batch_id),
                }
            })
            .collect();

        if let Err(source) = self.store.apply_changes(batch.dataset, &inverse).await {
            return Err(ImportError::RollbackFailed { batch_id, source });
        }

        batch.transition(BatchStatus::RolledBack)?;
        if let Err(source) = self.store.update_batch(&batch).await {
            return Err(ImportError::RollbackFailed { batch_id, source });
        }
        log::info!(
            "Batch {} rolled back ({} changes reverted)",
            batch_id,
            inverse.len()
        );
        Ok(batch)
    }
}
