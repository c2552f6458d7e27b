use serde::{Deserialize, Serialize};

/// Root of every topic this device uses.
pub const TOPIC_ROOT: &str = "devices";

/// The full topic table for one device, namespaced by its identifier.
///
/// `*_set` topics are commands coming in from the broker; `*_state` topics
/// are retained reports going out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    pub pump_set: String,
    pub pump_state: String,
    pub valve_set: String,
    pub valve_state: String,
    pub wifi_state: String,
    pub wifi_clear: String,
    pub timer_set: String,
    pub timer_state: String,
    pub temperature_state: String,
}

impl Topics {
    pub fn for_device(device_id: &str) -> Self {
        let topic = |leaf: &str| format!("{}/{}/{}", TOPIC_ROOT, device_id, leaf);

        Self {
            pump_set: topic("pump/set"),
            pump_state: topic("pump/state"),
            valve_set: topic("valve/set"),
            valve_state: topic("valve/state"),
            wifi_state: topic("wifi/state"),
            wifi_clear: topic("wifi/clear"),
            timer_set: topic("timer/set"),
            timer_state: topic("timer/state"),
            temperature_state: topic("temperature/state"),
        }
    }

    /// Command topics the device subscribes to after every connect.
    pub fn subscriptions(&self) -> [&str; 4] {
        [
            &self.pump_set,
            &self.valve_set,
            &self.timer_set,
            &self.wifi_clear,
        ]
    }
}
