//! Engine configuration.

use chunkflow_transfer::{DEFAULT_CHUNK_SIZE, ValidationRules};

use crate::retry::RetryConfig;

/// Tunables for an [`UploadEngine`](crate::UploadEngine).
///
/// The defaults are deliberately conservative; none of them are
/// load-bearing for correctness and all can be changed per instance
/// (concurrency even at runtime via `set_concurrency_limit`).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sessions allowed to be active at once.
    pub max_concurrent: usize,
    /// Bytes per append operation.
    pub chunk_size: u64,
    /// Backoff and attempt budget for transient failures.
    pub retry: RetryConfig,
    /// Admission rules applied by `add`.
    pub rules: ValidationRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
            rules: ValidationRules::default(),
        }
    }
}
