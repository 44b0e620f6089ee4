use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::traits::BrokerResult;
use crate::types::{BroadcastPayload, ObserverId, SensorId};

/// Default number of undelivered updates an observer may queue
pub const DEFAULT_OBSERVER_QUEUE_CAPACITY: usize = 64;

/// How a wildcard subscription interacts with the explicit sensor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WildcardPolicy {
    /// Wildcard and explicit sensors coexist
    #[default]
    Additive,
    /// Wildcard replaces the explicit set and vice versa
    Exclusive,
}

impl FromStr for WildcardPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "additive" => Ok(WildcardPolicy::Additive),
            "exclusive" => Ok(WildcardPolicy::Exclusive),
            other => Err(format!("unknown wildcard policy: {}", other)),
        }
    }
}

/// Which sensors an observer wants to hear about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscription {
    pub sensors: HashSet<SensorId>,
    pub all_sensors: bool,
}

impl Subscription {
    pub fn matches(&self, sensor_id: &str) -> bool {
        self.all_sensors || self.sensors.contains(sensor_id)
    }

    fn subscribe(&mut self, sensor_id: Option<&str>, policy: WildcardPolicy) {
        match (sensor_id, policy) {
            (None, WildcardPolicy::Additive) => self.all_sensors = true,
            (None, WildcardPolicy::Exclusive) => {
                self.all_sensors = true;
                self.sensors.clear();
            }
            (Some(id), WildcardPolicy::Additive) => {
                self.sensors.insert(id.to_string());
            }
            (Some(id), WildcardPolicy::Exclusive) => {
                self.all_sensors = false;
                self.sensors.insert(id.to_string());
            }
        }
    }

    fn unsubscribe(&mut self, sensor_id: Option<&str>) {
        match sensor_id {
            None => {
                self.all_sensors = false;
                self.sensors.clear();
            }
            Some(id) => {
                self.sensors.remove(id);
            }
        }
    }
}

/// Receiving side of a connected observer
pub struct ObserverHandle {
    pub id: ObserverId,
    pub updates: mpsc::Receiver<Arc<str>>,
}

struct Observer {
    subscription: Subscription,
    sender: mpsc::Sender<Arc<str>>,
    connected_at: DateTime<Utc>,
}

/// Fans selected readings out to subscribed observers.
///
/// One lock guards the observer set and every subscription; broadcast holds
/// it for the whole fan-out and never awaits while holding it.
#[derive(Clone)]
pub struct BroadcastHub {
    observers: Arc<Mutex<HashMap<ObserverId, Observer>>>,
    policy: WildcardPolicy,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(policy: WildcardPolicy) -> Self {
        Self::with_capacity(policy, DEFAULT_OBSERVER_QUEUE_CAPACITY)
    }

    /// Create a hub with a custom per-observer queue capacity
    pub fn with_capacity(policy: WildcardPolicy, queue_capacity: usize) -> Self {
        Self {
            observers: Arc::new(Mutex::new(HashMap::new())),
            policy,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn policy(&self) -> WildcardPolicy {
        self.policy
    }

    /// Register a new observer with an empty subscription
    pub fn connect(&self) -> ObserverHandle {
        let id = Uuid::new_v4();
        let (sender, updates) = mpsc::channel(self.queue_capacity);
        let observer = Observer {
            subscription: Subscription::default(),
            sender,
            connected_at: Utc::now(),
        };

        self.observers.lock().insert(id, observer);
        debug!("Observer {} connected", id);

        ObserverHandle { id, updates }
    }

    /// Subscribe to one sensor, or to all when `sensor_id` is `None`.
    /// Returns false if the observer is not connected.
    pub fn subscribe(&self, id: &ObserverId, sensor_id: Option<&str>) -> bool {
        match self.observers.lock().get_mut(id) {
            Some(observer) => {
                observer.subscription.subscribe(sensor_id, self.policy);
                true
            }
            None => false,
        }
    }

    /// Unsubscribe from one sensor, or clear everything when `sensor_id` is `None`.
    /// Returns false if the observer is not connected.
    pub fn unsubscribe(&self, id: &ObserverId, sensor_id: Option<&str>) -> bool {
        match self.observers.lock().get_mut(id) {
            Some(observer) => {
                observer.subscription.unsubscribe(sensor_id);
                true
            }
            None => false,
        }
    }

    /// Remove an observer; safe to call more than once
    pub fn disconnect(&self, id: &ObserverId) -> bool {
        match self.observers.lock().remove(id) {
            Some(observer) => {
                let connected_for = Utc::now() - observer.connected_at;
                debug!(
                    "Observer {} disconnected after {}s",
                    id,
                    connected_for.num_seconds()
                );
                true
            }
            None => false,
        }
    }

    /// Snapshot of an observer's subscription
    pub fn subscription(&self, id: &ObserverId) -> Option<Subscription> {
        self.observers
            .lock()
            .get(id)
            .map(|observer| observer.subscription.clone())
    }

    /// Get the count of connected observers
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Serialize a payload once and deliver it to matching observers
    pub fn broadcast(&self, payload: &BroadcastPayload) -> BrokerResult<usize> {
        let encoded: Arc<str> = serde_json::to_string(payload)?.into();
        Ok(self.broadcast_raw(&payload.sensor_id, encoded))
    }

    /// Deliver an already encoded update; returns how many observers received it.
    ///
    /// Observers whose queue is closed or full are disconnected.
    pub fn broadcast_raw(&self, sensor_id: &str, encoded: Arc<str>) -> usize {
        let mut observers = self.observers.lock();
        let mut delivered = 0;
        let mut dropped = Vec::new();

        for (id, observer) in observers.iter() {
            if !observer.subscription.matches(sensor_id) {
                continue;
            }

            match observer.sender.try_send(encoded.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Observer {} is not keeping up, disconnecting", id);
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    info!("Observer {} went away, disconnecting", id);
                    dropped.push(*id);
                }
            }
        }

        for id in dropped {
            observers.remove(&id);
        }

        delivered
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(WildcardPolicy::default())
    }
}
