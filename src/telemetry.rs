use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::sim::{Subscription, VehicleStore};
use crate::vehicle::VehicleState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub vehicle_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub state: VehicleState,
}

impl TelemetryMessage {
    pub fn new(vehicle_id: &str, state: VehicleState) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            state,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Logs every snapshot the store publishes as a JSON telemetry message.
pub struct TelemetryLogger {
    subscription: Subscription,
}

impl TelemetryLogger {
    pub fn attach(store: &VehicleStore, vehicle_id: &str) -> Self {
        info!("Attaching telemetry logger for {}", vehicle_id);
        let vehicle_id = vehicle_id.to_string();
        let subscription = store.subscribe(move |state| {
            match TelemetryMessage::new(&vehicle_id, state.clone()).to_json() {
                Ok(payload) => debug!("Telemetry: {}", payload),
                Err(e) => error!("Failed to serialize telemetry: {}", e),
            }
        });
        Self { subscription }
    }

    pub fn detach(self) {
        self.subscription.unsubscribe();
    }
}
