use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::traits::{BrokerError, BrokerResult, SensorStore};
use crate::types::{ReliabilityStats, SensorId};

/// Default damping constant for reliability policies
pub const DEFAULT_EPSILON: f64 = 0.01;

/// Maps a sensor's running mean and variance to a reliability score.
///
/// Implementations must be pure and non-increasing in `variance` for a
/// fixed `mean`.
pub trait ReliabilityPolicy: Send + Sync + fmt::Debug {
    fn score(&self, mean: f64, variance: f64) -> f64;

    fn name(&self) -> &'static str;
}

/// `1 - variance / (variance + |mean| + epsilon)`, bounded to (0, 1]
#[derive(Debug, Clone, Copy)]
pub struct VarianceRatio {
    pub epsilon: f64,
}

impl Default for VarianceRatio {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl ReliabilityPolicy for VarianceRatio {
    fn score(&self, mean: f64, variance: f64) -> f64 {
        1.0 - variance / (variance + mean.abs() + self.epsilon)
    }

    fn name(&self) -> &'static str {
        "variance_ratio"
    }
}

/// `|mean| / (variance + epsilon)`, unbounded above
#[derive(Debug, Clone, Copy)]
pub struct SignalToNoise {
    pub epsilon: f64,
}

impl Default for SignalToNoise {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl ReliabilityPolicy for SignalToNoise {
    fn score(&self, mean: f64, variance: f64) -> f64 {
        mean.abs() / (variance + self.epsilon)
    }

    fn name(&self) -> &'static str {
        "signal_to_noise"
    }
}

/// Configurable choice of reliability policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    VarianceRatio,
    SignalToNoise,
}

impl PolicyKind {
    pub fn build(self, epsilon: f64) -> Arc<dyn ReliabilityPolicy> {
        match self {
            PolicyKind::VarianceRatio => Arc::new(VarianceRatio { epsilon }),
            PolicyKind::SignalToNoise => Arc::new(SignalToNoise { epsilon }),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "variance_ratio" => Ok(PolicyKind::VarianceRatio),
            "signal_to_noise" => Ok(PolicyKind::SignalToNoise),
            other => Err(format!("unknown reliability policy: {}", other)),
        }
    }
}

impl ReliabilityStats {
    /// First row for a sensor
    pub fn seed(
        sensor_id: SensorId,
        temperature: f64,
        policy: &dyn ReliabilityPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id,
            count: 1,
            mean: temperature,
            variance: 0.0,
            reliability: policy.score(temperature, 0.0),
            updated_at: now,
        }
    }

    /// Fold one temperature into the row using Welford's update.
    ///
    /// The row is left untouched if the update would not stay finite.
    pub fn observe(
        &mut self,
        temperature: f64,
        policy: &dyn ReliabilityPolicy,
        now: DateTime<Utc>,
    ) -> BrokerResult<()> {
        let count = self.count as f64;
        let new_count = count + 1.0;
        let delta = temperature - self.mean;
        let new_mean = self.mean + delta / new_count;
        let new_variance = (self.variance * count + delta * (temperature - new_mean)) / new_count;
        if !(new_mean.is_finite() && new_variance.is_finite()) {
            return Err(BrokerError::StatisticsOverflow(self.sensor_id.clone()));
        }

        // Rounding can leave a tiny negative residue on constant series
        let new_variance = new_variance.max(0.0);
        let reliability = policy.score(new_mean, new_variance);
        if !reliability.is_finite() {
            return Err(BrokerError::StatisticsOverflow(self.sensor_id.clone()));
        }

        self.count += 1;
        self.mean = new_mean;
        self.variance = new_variance;
        self.reliability = reliability;
        self.updated_at = now;
        Ok(())
    }
}

/// Maintains per-sensor online statistics in the store.
///
/// Read-modify-write for one sensor is serialized through a per-sensor
/// async lock; distinct sensors update concurrently.
pub struct ReliabilityEstimator {
    store: Arc<dyn SensorStore>,
    policy: Arc<dyn ReliabilityPolicy>,
    row_locks: Mutex<HashMap<SensorId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReliabilityEstimator {
    pub fn new(store: Arc<dyn SensorStore>, policy: Arc<dyn ReliabilityPolicy>) -> Self {
        Self {
            store,
            policy,
            row_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &dyn ReliabilityPolicy {
        self.policy.as_ref()
    }

    fn row_lock(&self, sensor_id: &SensorId) -> Arc<tokio::sync::Mutex<()>> {
        self.row_locks
            .lock()
            .entry(sensor_id.clone())
            .or_default()
            .clone()
    }

    /// Fold a new temperature into the sensor's row and persist it.
    ///
    /// Nothing is written when the temperature is not finite or the updated
    /// statistics would overflow.
    pub async fn update(
        &self,
        sensor_id: &SensorId,
        temperature: f64,
    ) -> BrokerResult<ReliabilityStats> {
        if !temperature.is_finite() {
            return Err(BrokerError::StatisticsOverflow(sensor_id.clone()));
        }

        let lock = self.row_lock(sensor_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let policy = self.policy.as_ref();
        let stats = match self.store.get_reliability(sensor_id).await? {
            Some(mut stats) => {
                stats.observe(temperature, policy, now)?;
                stats
            }
            None => ReliabilityStats::seed(sensor_id.clone(), temperature, policy, now),
        };

        self.store.put_reliability(&stats).await?;

        debug!(
            "Updated reliability for sensor {}: count={} mean={:.3} variance={:.3} reliability={:.4}",
            stats.sensor_id, stats.count, stats.mean, stats.variance, stats.reliability
        );

        Ok(stats)
    }
}
