use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::{BrokerError, BrokerResult};

/// Unique identifier for sensors
pub type SensorId = String;

/// Unique identifier for connected observers
pub type ObserverId = Uuid;

/// One sensor observation, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: SensorId,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub visibility: f64,
    pub aqi: i32,
    pub occupancy: i32,
    pub created_at: DateTime<Utc>,
}

/// One sensor observation as sent by a producer.
///
/// `created_at` is deliberately absent: the listener stamps readings at
/// receipt, so any timestamp on the wire is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingReading {
    pub sensor_id: SensorId,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub humidity: f64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub visibility: f64,
    #[serde(default)]
    pub aqi: i32,
    #[serde(default)]
    pub occupancy: i32,
}

impl IncomingReading {
    pub fn received_at(self, created_at: DateTime<Utc>) -> Reading {
        Reading {
            sensor_id: self.sensor_id,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            visibility: self.visibility,
            aqi: self.aqi,
            occupancy: self.occupancy,
            created_at,
        }
    }
}

/// Largest accepted magnitude for a floating point measurement. Keeps the
/// running variance of any series far from `f64` overflow.
pub const MAX_MEASUREMENT_MAGNITUDE: f64 = 1e12;

/// Decode one producer line into a reading stamped with `received_at`
pub fn decode_reading(line: &[u8], received_at: DateTime<Utc>) -> BrokerResult<Reading> {
    let incoming: IncomingReading = serde_json::from_slice(line)
        .map_err(|e| BrokerError::MalformedReading(e.to_string()))?;

    if incoming.sensor_id.trim().is_empty() {
        return Err(BrokerError::MalformedReading(
            "sensor_id must not be empty".to_string(),
        ));
    }

    let measurements = [
        ("temperature", incoming.temperature),
        ("humidity", incoming.humidity),
        ("pressure", incoming.pressure),
        ("visibility", incoming.visibility),
    ];
    for (field, value) in measurements {
        if !value.is_finite() || value.abs() > MAX_MEASUREMENT_MAGNITUDE {
            return Err(BrokerError::MalformedReading(format!(
                "{} out of range: {}",
                field, value
            )));
        }
    }

    Ok(incoming.received_at(received_at))
}

/// Online statistics over one sensor's temperature series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityStats {
    pub sensor_id: SensorId,
    pub count: u64,
    pub mean: f64,
    pub variance: f64,
    pub reliability: f64,
    pub updated_at: DateTime<Utc>,
}

/// Wire form of the currently selected best reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub sensor_id: SensorId,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub visibility: f64,
    pub aqi: i32,
    pub occupancy: i32,
    pub reliability_score: f64,
    pub created_at: DateTime<Utc>,
}

impl BroadcastPayload {
    pub fn new(reading: Reading, reliability_score: f64) -> Self {
        Self {
            sensor_id: reading.sensor_id,
            temperature: reading.temperature,
            humidity: reading.humidity,
            pressure: reading.pressure,
            visibility: reading.visibility,
            aqi: reading.aqi,
            occupancy: reading.occupancy,
            reliability_score,
            created_at: reading.created_at,
        }
    }
}

/// Messages sent by observers to manage their subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Subscribe to one sensor, or to all sensors when `sensor_id` is omitted
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sensor_id: Option<SensorId>,
    },

    /// Unsubscribe from one sensor, or from everything when `sensor_id` is omitted
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sensor_id: Option<SensorId>,
    },
}

impl ControlMessage {
    /// Target sensor, with an empty string treated the same as an omitted one
    pub fn target(&self) -> Option<&str> {
        let sensor_id = match self {
            ControlMessage::Subscribe { sensor_id } | ControlMessage::Unsubscribe { sensor_id } => {
                sensor_id.as_deref()
            }
        };
        sensor_id.filter(|id| !id.is_empty())
    }
}
