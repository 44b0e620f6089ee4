pub mod config;
pub mod estimator;
pub mod hub;
pub mod listener;
pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod selector;
pub mod traits;
pub mod types;
pub mod websocket;

pub use config::{BrokerConfig, ConfigError};
pub use estimator::{
    PolicyKind, ReliabilityEstimator, ReliabilityPolicy, SignalToNoise, VarianceRatio,
};
pub use hub::{BroadcastHub, ObserverHandle, Subscription, WildcardPolicy};
pub use memory::InMemorySensorStore;
pub use pipeline::{PipelineOutcome, ReadingPipeline};
pub use postgres::PostgresSensorStore;
pub use selector::BestSensorSelector;
pub use traits::{BrokerError, BrokerResult, SensorStore};
pub use types::*;
pub use websocket::{handle_websocket, router, BrokerState};
