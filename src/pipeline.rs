use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::estimator::{ReliabilityEstimator, ReliabilityPolicy};
use crate::hub::BroadcastHub;
use crate::selector::{BestSensorSelector, DEFAULT_SELECTION_WINDOW};
use crate::traits::{BrokerResult, SensorStore};
use crate::types::{BroadcastPayload, Reading, SensorId};

/// What happened to one reading after it was persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The best sensor's latest reading was sent to `delivered` observers
    Broadcast { sensor_id: SensorId, delivered: usize },
    /// No sensor reported within the selection window
    NoCandidate,
    /// The selected sensor has no stored reading
    MissingLatest { sensor_id: SensorId },
}

/// Persist → estimate → select → broadcast, for one reading at a time
pub struct ReadingPipeline {
    store: Arc<dyn SensorStore>,
    estimator: ReliabilityEstimator,
    selector: BestSensorSelector,
    hub: BroadcastHub,
    window: Duration,
}

impl ReadingPipeline {
    pub fn new(
        store: Arc<dyn SensorStore>,
        policy: Arc<dyn ReliabilityPolicy>,
        hub: BroadcastHub,
    ) -> Self {
        Self {
            estimator: ReliabilityEstimator::new(store.clone(), policy),
            selector: BestSensorSelector::new(store.clone()),
            store,
            hub,
            window: DEFAULT_SELECTION_WINDOW,
        }
    }

    /// Override the selection window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn estimator(&self) -> &ReliabilityEstimator {
        &self.estimator
    }

    /// Run one reading through the pipeline.
    ///
    /// An error aborts only this reading; later readings are unaffected.
    pub async fn process(&self, reading: Reading) -> BrokerResult<PipelineOutcome> {
        self.store.save_reading(&reading).await?;
        debug!("Stored reading for sensor {}", reading.sensor_id);

        self.estimator
            .update(&reading.sensor_id, reading.temperature)
            .await?;

        let best = match self.selector.select_best(self.window).await? {
            Some(best) => best,
            None => {
                debug!("No sensor reported within {:?}, skipping broadcast", self.window);
                return Ok(PipelineOutcome::NoCandidate);
            }
        };

        let latest = match self.store.latest_reading(&best.sensor_id).await? {
            Some(latest) => latest,
            None => {
                debug!("No stored reading for best sensor {}", best.sensor_id);
                return Ok(PipelineOutcome::MissingLatest {
                    sensor_id: best.sensor_id,
                });
            }
        };

        let payload = BroadcastPayload::new(latest, best.reliability);
        let delivered = self.hub.broadcast(&payload)?;

        info!(
            "Broadcast sensor {} (reliability {:.4}) to {} observers",
            payload.sensor_id, payload.reliability_score, delivered
        );

        Ok(PipelineOutcome::Broadcast {
            sensor_id: payload.sensor_id,
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::VarianceRatio;
    use crate::memory::InMemorySensorStore;
    use crate::traits::BrokerError;
    use crate::types::ReliabilityStats;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn reading(sensor_id: &str, temperature: f64) -> Reading {
        Reading {
            sensor_id: sensor_id.to_string(),
            temperature,
            humidity: 45.0,
            pressure: 1002.0,
            visibility: 7.5,
            aqi: 30,
            occupancy: 12,
            created_at: Utc::now(),
        }
    }

    fn pipeline(store: Arc<dyn SensorStore>, hub: BroadcastHub) -> ReadingPipeline {
        ReadingPipeline::new(store, Arc::new(VarianceRatio::default()), hub)
    }

    #[tokio::test]
    async fn test_three_readings_end_to_end() {
        let store = Arc::new(InMemorySensorStore::new());
        let hub = BroadcastHub::default();
        let mut observer = hub.connect();
        hub.subscribe(&observer.id, Some("sensor-1"));
        let pipeline = pipeline(store.clone(), hub);

        for temperature in [20.0, 22.0, 18.0] {
            let outcome = pipeline.process(reading("sensor-1", temperature)).await.unwrap();
            assert_eq!(
                outcome,
                PipelineOutcome::Broadcast {
                    sensor_id: "sensor-1".to_string(),
                    delivered: 1
                }
            );
        }

        let stats = store.get_reliability(&"sensor-1".to_string()).await.unwrap().unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 20.0).abs() < 1e-12);

        let mut last = None;
        while let Ok(update) = observer.updates.try_recv() {
            last = Some(serde_json::from_str::<BroadcastPayload>(&update).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.temperature, 18.0);
        assert_eq!(last.reliability_score, stats.reliability);
    }

    #[tokio::test]
    async fn test_broadcasts_best_sensor_not_latest_arrival() {
        let store = Arc::new(InMemorySensorStore::new());
        let hub = BroadcastHub::default();
        let pipeline = pipeline(store, hub);

        // steady sensor
        for _ in 0..5 {
            pipeline.process(reading("steady", 20.0)).await.unwrap();
        }
        // noisy sensor
        pipeline.process(reading("noisy", 10.0)).await.unwrap();
        let outcome = pipeline.process(reading("noisy", 30.0)).await.unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::Broadcast {
                sensor_id: "steady".to_string(),
                delivered: 0
            }
        );
    }

    #[tokio::test]
    async fn test_selected_sensor_without_reading_skips_broadcast() {
        let store = Arc::new(InMemorySensorStore::new());
        store
            .put_reliability(&ReliabilityStats {
                sensor_id: "ghost".to_string(),
                count: 1000,
                mean: 20.0,
                variance: 0.0,
                reliability: 1.0,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let hub = BroadcastHub::default();
        let mut observer = hub.connect();
        hub.subscribe(&observer.id, None);
        let pipeline = pipeline(store, hub);

        let outcome = pipeline.process(reading("sensor-1", 21.0)).await.unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::MissingLatest {
                sensor_id: "ghost".to_string()
            }
        );
        assert!(observer.updates.try_recv().is_err());
    }

    struct FailingStore;

    #[async_trait]
    impl SensorStore for FailingStore {
        async fn save_reading(&self, _reading: &Reading) -> BrokerResult<()> {
            Err(BrokerError::Internal("disk full".to_string()))
        }

        async fn get_reliability(
            &self,
            _sensor_id: &SensorId,
        ) -> BrokerResult<Option<ReliabilityStats>> {
            Ok(None)
        }

        async fn put_reliability(&self, _stats: &ReliabilityStats) -> BrokerResult<()> {
            Ok(())
        }

        async fn query_best_candidate(
            &self,
            _since: DateTime<Utc>,
        ) -> BrokerResult<Option<ReliabilityStats>> {
            Ok(None)
        }

        async fn latest_reading(&self, _sensor_id: &SensorId) -> BrokerResult<Option<Reading>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_storage_fault_aborts_reading() {
        let hub = BroadcastHub::default();
        let mut observer = hub.connect();
        hub.subscribe(&observer.id, None);
        let pipeline = pipeline(Arc::new(FailingStore), hub);

        let result = pipeline.process(reading("sensor-1", 20.0)).await;
        assert!(matches!(result, Err(BrokerError::Internal(_))));
        assert!(observer.updates.try_recv().is_err());
    }
}
