//! Import orchestration: upload → analyze → apply
//!
//! One [`ImportSession`] drives one uploaded file through the whole pipeline
//! as a single sequential task. Nothing is persisted until `apply`, which is
//! gated on explicit caller confirmation; abandoning a session before that
//! point has no side effects. A failed or timed-out apply resets the session
//! so the caller must start over from upload against a fresh snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::timeout;
use uuid::Uuid;

use crate::batch::{BatchManager, BatchStatus};
use crate::config::ImportConfig;
use crate::diff::{DiffReport, DiffSummary, diff_records, snapshot_lookup};
use crate::error::ImportError;
use crate::excel::{RawTable, read_table};
use crate::matching::{HeaderMapping, match_headers};
use crate::normalize::{ParseResult, classify::classify_rows, normalize_rows};
use crate::schema::DatasetType;
use crate::store::Repository;

/// Everything the analyze phase learned, as plain data for the caller.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub sheet_name: String,
    pub confidence: f64,
    pub unmapped_headers: Vec<String>,
    pub total_lines: usize,
    pub valid_lines: usize,
    pub skipped_lines: usize,
    pub diff: DiffSummary,
    pub messages: Vec<String>,
}

/// Result of a confirmed apply.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub batch_id: Uuid,
    pub diff: DiffSummary,
    pub info: Vec<String>,
}

/// In-memory analysis state carried between analyze and apply.
#[derive(Debug, Clone)]
struct Analysis {
    sheet_name: String,
    mapping: HeaderMapping,
    parse: ParseResult,
    report: DiffReport,
}

enum SessionState {
    AwaitingUpload,
    Uploaded { filename: String, table: RawTable },
    Analyzed { filename: String, analysis: Box<Analysis> },
    Applied { batch_id: Uuid },
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::AwaitingUpload => "awaiting_upload",
            SessionState::Uploaded { .. } => "uploaded",
            SessionState::Analyzed { .. } => "analyzed",
            SessionState::Applied { .. } => "applied",
        }
    }
}

/// Sequences the import pipeline for one dataset against one store.
pub struct ImportSession {
    dataset: DatasetType,
    store: Arc<dyn Repository>,
    config: ImportConfig,
    state: SessionState,
}

impl ImportSession {
    pub fn new(dataset: DatasetType, store: Arc<dyn Repository>, config: ImportConfig) -> Self {
        Self {
            dataset,
            store,
            config,
            state: SessionState::AwaitingUpload,
        }
    }

    /// Current state label, for callers that render progress.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Discard all in-memory state. Always safe before apply has begun.
    pub fn reset(&mut self) {
        self.state = SessionState::AwaitingUpload;
    }

    /// Batch id produced by a successful apply, if any.
    pub fn applied_batch_id(&self) -> Option<Uuid> {
        match &self.state {
            SessionState::Applied { batch_id } => Some(*batch_id),
            _ => None,
        }
    }

    /// Accept and decode an uploaded file.
    ///
    /// Rejects wrong extensions and oversized files before any decoding.
    /// Re-uploading at any point simply discards previous in-memory state.
    pub fn upload(
        &mut self,
        filename: &str,
        bytes: Vec<u8>,
        sheet: Option<&str>,
    ) -> Result<(), ImportError> {
        let schema = self.dataset.schema();
        let table = read_table(filename, bytes, schema, sheet, &self.config)?;
        self.state = SessionState::Uploaded {
            filename: filename.to_string(),
            table,
        };
        Ok(())
    }

    /// Run matcher → normalizer → classifier → diff without touching the
    /// store (beyond the read-only snapshot fetch).
    pub async fn analyze(&mut self) -> Result<AnalysisReport, ImportError> {
        let (filename, table) = match &self.state {
            SessionState::Uploaded { filename, table } => (filename.clone(), table.clone()),
            other => {
                return Err(ImportError::InvalidSessionState {
                    state: other.name(),
                    expected: "uploaded",
                });
            }
        };

        let schema = self.dataset.schema();
        let mapping = match_headers(&table.headers, schema);
        if mapping.confidence < schema.min_confidence {
            return Err(ImportError::LowHeaderConfidence {
                confidence: mapping.confidence,
                threshold: schema.min_confidence,
                unmapped_headers: mapping.unmapped.clone(),
                unmatched_fields: mapping.unmatched_fields(schema),
            });
        }

        let mut parse = normalize_rows(&table, &mapping, schema, self.config.error_budget);

        let snapshot = timeout(self.config.fetch_timeout, self.store.fetch_all(self.dataset))
            .await
            .map_err(|_| ImportError::Timeout("snapshot fetch"))??;

        if self.dataset == DatasetType::SegmentMapping {
            classify_rows(&mut parse.rows, &snapshot, &mut parse.messages);
        }

        let existing = snapshot_lookup(snapshot);
        let report = diff_records(&parse.rows, &existing, schema);

        let analysis = Analysis {
            sheet_name: table.sheet_name,
            mapping,
            parse,
            report,
        };
        let summary = AnalysisReport {
            sheet_name: analysis.sheet_name.clone(),
            confidence: analysis.mapping.confidence,
            unmapped_headers: analysis.mapping.unmapped.clone(),
            total_lines: analysis.parse.total_lines,
            valid_lines: analysis.parse.valid_lines,
            skipped_lines: analysis.parse.skipped_lines,
            diff: analysis.report.summary,
            messages: analysis.parse.messages.clone(),
        };

        self.state = SessionState::Analyzed {
            filename,
            analysis: Box::new(analysis),
        };
        Ok(summary)
    }

    /// Persist the analyzed diff as a tracked batch.
    ///
    /// Never automatic: only an explicit call gets here, and only from a
    /// completed analysis with at least one usable row. After a failed or
    /// timed-out commit the session resets and requires a fresh upload.
    pub async fn apply(&mut self) -> Result<ApplyOutcome, ImportError> {
        let state = std::mem::replace(&mut self.state, SessionState::AwaitingUpload);
        let (filename, analysis) = match state {
            SessionState::Analyzed { filename, analysis } => (filename, analysis),
            other => {
                let name = other.name();
                self.state = other;
                return Err(ImportError::InvalidSessionState {
                    state: name,
                    expected: "analyzed",
                });
            }
        };

        if analysis.parse.valid_lines == 0 {
            self.state = SessionState::Analyzed { filename, analysis };
            return Err(ImportError::NothingToImport);
        }

        let manager = BatchManager::new(self.store.clone());
        let column_mapping: HashMap<String, String> = analysis.mapping.by_header.clone();
        let mut batch = manager
            .create(self.dataset, &filename, &analysis.parse, Some(column_mapping))
            .await?;
        let batch_id = batch.id;

        match timeout(
            self.config.commit_timeout,
            manager.commit(&mut batch, &analysis.report),
        )
        .await
        {
            Ok(Ok(())) => {
                self.state = SessionState::Applied { batch_id };
                Ok(ApplyOutcome {
                    batch_id,
                    diff: analysis.report.summary,
                    info: analysis.parse.messages.clone(),
                })
            }
            Ok(Err(err)) => {
                // Failed commits are not auto-retried against a stale
                // snapshot; the caller starts over from upload.
                self.state = SessionState::AwaitingUpload;
                Err(err)
            }
            Err(_elapsed) => {
                // Unknown outcome: reconcile by re-fetching the batch rather
                // than retrying blindly, which could double-apply.
                log::warn!("Commit of batch {} timed out, reconciling status", batch_id);
                match self.store.fetch_batch(batch_id).await {
                    Ok(Some(final_batch)) if final_batch.status == BatchStatus::Completed => {
                        self.state = SessionState::Applied { batch_id };
                        Ok(ApplyOutcome {
                            batch_id,
                            diff: final_batch.diff.unwrap_or(analysis.report.summary),
                            info: analysis.parse.messages.clone(),
                        })
                    }
                    _ => {
                        self.state = SessionState::AwaitingUpload;
                        Err(ImportError::Timeout("commit"))
                    }
                }
            }
        }
    }
}
