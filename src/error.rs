//! Error taxonomy for the import engine
//!
//! Malformed-input and low-confidence errors are blocking and surfaced to the
//! caller before anything is persisted. Per-row validation failures never
//! appear here: the normalizer records them as skip messages and keeps going.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced across the engine boundary.
#[derive(Debug, Error)]
pub enum ImportError {
    /// File extension is not one of the accepted tabular formats.
    #[error("unsupported file type '.{extension}', accepted extensions: {accepted}")]
    UnsupportedFileType { extension: String, accepted: String },

    /// File exceeds the import size ceiling.
    #[error("file is {actual} bytes, exceeding the {limit} byte import ceiling")]
    FileTooLarge { actual: u64, limit: u64 },

    /// The file bytes could not be decoded as a workbook.
    #[error("could not decode workbook: {0}")]
    UnreadableWorkbook(String),

    /// The selected sheet has no header row or no data rows.
    #[error("sheet '{0}' is empty or has no data rows")]
    EmptySheet(String),

    /// Header matching fell below the acceptance threshold.
    #[error(
        "header match confidence {confidence:.2} is below the {threshold:.2} acceptance \
         threshold; unmapped headers: [{}]; unmatched fields: [{}]",
        .unmapped_headers.join(", "),
        .unmatched_fields.join(", ")
    )]
    LowHeaderConfidence {
        confidence: f64,
        threshold: f64,
        unmapped_headers: Vec<String>,
        unmatched_fields: Vec<String>,
    },

    /// Analysis produced zero usable rows, so there is nothing to apply.
    #[error("analysis produced no usable rows, nothing to import")]
    NothingToImport,

    /// A session method was called out of order.
    #[error("import session is in state '{state}', expected '{expected}'")]
    InvalidSessionState {
        state: &'static str,
        expected: &'static str,
    },

    /// A batch status transition outside the legal lifecycle.
    #[error("batch {batch_id}: illegal status transition {from} -> {to}")]
    InvalidBatchTransition {
        batch_id: Uuid,
        from: crate::batch::BatchStatus,
        to: crate::batch::BatchStatus,
    },

    /// A completed batch has no history to replay.
    #[error("batch {0} has no history records, cannot roll back")]
    MissingHistory(Uuid),

    /// The commit call failed; the batch has been marked failed.
    #[error("commit failed for batch {batch_id}: {source}")]
    CommitFailed {
        batch_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    /// The rollback call failed; the batch remains completed.
    #[error("rollback failed for batch {batch_id}: {source}")]
    RollbackFailed {
        batch_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    /// A store call exceeded its caller-enforced timeout.
    #[error("timed out during {0}")]
    Timeout(&'static str),

    /// Any other store-side failure.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}
