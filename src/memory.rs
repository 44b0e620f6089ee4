use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::selector::best_candidate;
use crate::traits::{BrokerResult, SensorStore};
use crate::types::{Reading, ReliabilityStats, SensorId};

/// In-process implementation of SensorStore.
///
/// Keeps only the latest reading per sensor; older readings are counted
/// but not retained.
#[derive(Default)]
pub struct InMemorySensorStore {
    latest: RwLock<HashMap<SensorId, Reading>>,
    reliability: RwLock<HashMap<SensorId, ReliabilityStats>>,
    readings_saved: AtomicU64,
}

impl InMemorySensorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total readings saved since creation
    pub fn readings_saved(&self) -> u64 {
        self.readings_saved.load(Ordering::Relaxed)
    }

    /// Snapshot of every reliability row
    pub fn reliability_rows(&self) -> Vec<ReliabilityStats> {
        self.reliability.read().values().cloned().collect()
    }
}

#[async_trait]
impl SensorStore for InMemorySensorStore {
    async fn save_reading(&self, reading: &Reading) -> BrokerResult<()> {
        let mut latest = self.latest.write();
        let replace = latest
            .get(&reading.sensor_id)
            .map(|current| current.created_at <= reading.created_at)
            .unwrap_or(true);
        if replace {
            latest.insert(reading.sensor_id.clone(), reading.clone());
        }
        self.readings_saved.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_reliability(
        &self,
        sensor_id: &SensorId,
    ) -> BrokerResult<Option<ReliabilityStats>> {
        Ok(self.reliability.read().get(sensor_id).cloned())
    }

    async fn put_reliability(&self, stats: &ReliabilityStats) -> BrokerResult<()> {
        self.reliability
            .write()
            .insert(stats.sensor_id.clone(), stats.clone());
        Ok(())
    }

    async fn query_best_candidate(
        &self,
        since: DateTime<Utc>,
    ) -> BrokerResult<Option<ReliabilityStats>> {
        let rows = self.reliability.read();
        Ok(best_candidate(rows.values(), since).cloned())
    }

    async fn latest_reading(&self, sensor_id: &SensorId) -> BrokerResult<Option<Reading>> {
        Ok(self.latest.read().get(sensor_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor_id: &str, temperature: f64, created_at: DateTime<Utc>) -> Reading {
        Reading {
            sensor_id: sensor_id.to_string(),
            temperature,
            humidity: 50.0,
            pressure: 1000.0,
            visibility: 10.0,
            aqi: 20,
            occupancy: 1,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_latest_reading_tracks_newest() {
        let store = InMemorySensorStore::new();
        let now = Utc::now();

        store.save_reading(&reading("s", 1.0, now)).await.unwrap();
        store
            .save_reading(&reading("s", 2.0, now - chrono::Duration::seconds(5)))
            .await
            .unwrap();
        store
            .save_reading(&reading("s", 3.0, now + chrono::Duration::seconds(5)))
            .await
            .unwrap();

        let latest = store.latest_reading(&"s".to_string()).await.unwrap().unwrap();
        assert_eq!(latest.temperature, 3.0);
        assert_eq!(store.readings_saved(), 3);
        assert!(store.latest_reading(&"other".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_reliability_upserts() {
        let store = InMemorySensorStore::new();
        let mut stats = ReliabilityStats {
            sensor_id: "s".to_string(),
            count: 5,
            mean: 25.0,
            variance: 1.2,
            reliability: 0.95,
            updated_at: Utc::now(),
        };
        store.put_reliability(&stats).await.unwrap();

        stats.count += 1;
        stats.mean = 26.0;
        store.put_reliability(&stats).await.unwrap();

        let updated = store.get_reliability(&"s".to_string()).await.unwrap().unwrap();
        assert_eq!(updated.count, 6);
        assert_eq!(updated.mean, 26.0);
        assert_eq!(store.reliability_rows().len(), 1);
    }
}
