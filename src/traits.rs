use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Reading, ReliabilityStats, SensorId};

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur in the broker
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Malformed reading: {0}")]
    MalformedReading(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Statistics for sensor {0} would overflow")]
    StatisticsOverflow(SensorId),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage backend for readings and per-sensor reliability rows
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Persist one ingested reading
    async fn save_reading(&self, reading: &Reading) -> BrokerResult<()>;

    /// Get the reliability row for a sensor, if one exists
    async fn get_reliability(&self, sensor_id: &SensorId) -> BrokerResult<Option<ReliabilityStats>>;

    /// Insert or update a reliability row, keyed by sensor id
    async fn put_reliability(&self, stats: &ReliabilityStats) -> BrokerResult<()>;

    /// Highest-ranked reliability row updated strictly after `since`.
    ///
    /// Ranking is reliability descending, then count descending, then
    /// `updated_at` descending.
    async fn query_best_candidate(
        &self,
        since: DateTime<Utc>,
    ) -> BrokerResult<Option<ReliabilityStats>>;

    /// Most recently stored reading for a sensor
    async fn latest_reading(&self, sensor_id: &SensorId) -> BrokerResult<Option<Reading>>;
}
