//! Spreadsheet Import & Reconciliation Engine
//!
//! Ingests uploaded tabular files with unknown column headers, maps them onto
//! a fixed dataset schema by exact-then-fuzzy matching, validates and
//! normalizes rows, diffs the result against the currently stored dataset,
//! and commits it as an atomically tracked, revertible batch.
//!
//! The pipeline runs one direction: file → matched headers → normalized rows
//! → diff → commit, with [`batch::BatchManager`] wrapping the commit step for
//! traceability and [`session::ImportSession`] sequencing the whole flow.
//! Storage is consumed through the [`store::Repository`] trait; the engine
//! never holds a backend connection of its own.

pub mod batch;
pub mod config;
pub mod diff;
pub mod error;
pub mod excel;
pub mod matching;
pub mod normalize;
pub mod schema;
pub mod session;
pub mod store;

pub use batch::{BatchManager, BatchStatus, ImportBatch};
pub use config::ImportConfig;
pub use diff::{ChangeKind, DiffReport, DiffSummary};
pub use error::ImportError;
pub use matching::{HeaderMapping, MatchType, match_headers};
pub use normalize::{NormalizedRow, ParseResult, normalize_rows};
pub use schema::{DatasetType, FieldSchema};
pub use session::{AnalysisReport, ApplyOutcome, ImportSession};
pub use store::{HistoryEntry, MemoryStore, RecordChange, Repository, StoredRecord};
