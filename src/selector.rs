use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::traits::{BrokerError, BrokerResult, SensorStore};
use crate::types::ReliabilityStats;

/// Default trailing window a sensor must have reported within
pub const DEFAULT_SELECTION_WINDOW: Duration = Duration::from_secs(60);

/// Orders candidates best-first: reliability, then count, then recency
pub fn rank(a: &ReliabilityStats, b: &ReliabilityStats) -> Ordering {
    b.reliability
        .total_cmp(&a.reliability)
        .then_with(|| b.count.cmp(&a.count))
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}

/// Best row among those updated strictly after `since`
pub fn best_candidate<'a, I>(rows: I, since: DateTime<Utc>) -> Option<&'a ReliabilityStats>
where
    I: IntoIterator<Item = &'a ReliabilityStats>,
{
    rows.into_iter()
        .filter(|stats| stats.updated_at > since)
        .min_by(|a, b| rank(a, b))
}

/// Names the most trustworthy sensor that is still reporting
#[derive(Clone)]
pub struct BestSensorSelector {
    store: Arc<dyn SensorStore>,
}

impl BestSensorSelector {
    pub fn new(store: Arc<dyn SensorStore>) -> Self {
        Self { store }
    }

    /// Select relative to the current time
    pub async fn select_best(&self, window: Duration) -> BrokerResult<Option<ReliabilityStats>> {
        self.select_best_at(window, Utc::now()).await
    }

    /// Select relative to `now`; `None` when no sensor reported within the window
    pub async fn select_best_at(
        &self,
        window: Duration,
        now: DateTime<Utc>,
    ) -> BrokerResult<Option<ReliabilityStats>> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| BrokerError::Internal(format!("Selection window out of range: {}", e)))?;
        self.store.query_best_candidate(now - window).await
    }
}
