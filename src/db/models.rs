//! Storage model types.

use chrono::{DateTime, Utc};

/// A registered URL to be probed periodically.
///
/// `url` is always in canonical form and unique across targets. Targets are
/// never mutated or deleted once created.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// One probe outcome for one target, append-only.
///
/// Either `status_code` is non-zero and `error` is empty (the final attempt
/// produced an HTTP response), or `status_code` is zero and `error` names
/// the terminal transport failure.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub target_id: String,
    /// When the probe's attempt sequence began.
    pub checked_at: DateTime<Utc>,
    pub status_code: u16,
    /// Elapsed wall time of the final attempt.
    pub latency_ms: i64,
    pub error: String,
}
