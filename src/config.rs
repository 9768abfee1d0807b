//! Import engine configuration with sane defaults

use std::time::Duration;

/// Maximum upload size accepted before decoding (50 MB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

/// Default cap on skipped-with-reason rows before parsing is truncated.
pub const DEFAULT_ERROR_BUDGET: usize = 100;

/// Tunables for a single import pipeline run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Upload size ceiling in bytes, enforced before any decoding.
    pub max_file_bytes: u64,
    /// Maximum number of per-row validation failures before parsing stops.
    pub error_budget: usize,
    /// Timeout for the existing-snapshot fetch.
    pub fetch_timeout: Duration,
    /// Timeout for the commit call. A timed-out commit is an unknown outcome
    /// and is reconciled by re-fetching the batch status.
    pub commit_timeout: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            error_budget: DEFAULT_ERROR_BUDGET,
            fetch_timeout: Duration::from_secs(30),
            commit_timeout: Duration::from_secs(60),
        }
    }
}

impl ImportConfig {
    /// Config with no effective limits, for tests.
    pub fn unbounded() -> Self {
        Self {
            max_file_bytes: u64::MAX,
            error_budget: usize::MAX,
            fetch_timeout: Duration::from_secs(3600),
            commit_timeout: Duration::from_secs(3600),
        }
    }
}
