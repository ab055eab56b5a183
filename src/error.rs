// Error taxonomy for the analytics engine
//
// Local recovery is reserved for per-entity classification gaps (those
// are warnings, handled in aggregation). Anything touching correctness
// of an aggregate fails the run loudly instead of producing a
// silently-wrong snapshot.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid registry, weights, or thresholds. Fatal at startup;
    /// no pipeline run proceeds with a broken configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The record store failed mid-read. Aborts the current run;
    /// the scheduler retries the whole period on its next invocation.
    #[error("data source read failed: {0}")]
    DataSource(String),

    /// A metric name was requested that no definition covers.
    /// Fatal to that metric's computation only, never to siblings.
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    /// The staging-to-published swap failed. Nothing was published;
    /// the period is safe to recompute in full.
    #[error("snapshot publish failed for {dimension} {period}: {reason}")]
    SnapshotPublish {
        dimension: String,
        period: String,
        reason: String,
    },
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn data_source(msg: impl Into<String>) -> Self {
        EngineError::DataSource(msg.into())
    }

    pub fn publish(dimension: &str, period: &str, reason: impl Into<String>) -> Self {
        EngineError::SnapshotPublish {
            dimension: dimension.to_string(),
            period: period.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that abort the whole run rather than a single
    /// metric or entity.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_)
                | EngineError::DataSource(_)
                | EngineError::SnapshotPublish { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_classification() {
        assert!(EngineError::config("weights sum to 95").is_fatal_to_run());
        assert!(EngineError::data_source("connection lost").is_fatal_to_run());
        assert!(EngineError::publish("geographic", "2025-Q1", "disk full").is_fatal_to_run());
        assert!(!EngineError::UnknownMetric("turnover".to_string()).is_fatal_to_run());
    }

    #[test]
    fn test_display_carries_context() {
        let err = EngineError::publish("sector", "2024-Q4", "staging table missing");
        let msg = err.to_string();
        assert!(msg.contains("sector"));
        assert!(msg.contains("2024-Q4"));
        assert!(msg.contains("staging table missing"));
    }
}
