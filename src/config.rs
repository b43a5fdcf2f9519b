use std::time::Duration;

use mac_address::MacAddress;
use serde_derive::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

/// One monitored RAPT Pill. Addresses are parsed case-insensitively, so the
/// config may use either hex case.
#[derive(Deserialize, Debug, Clone)]
pub struct Device {
    pub address: MacAddress,
    pub name: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub interval_ms: Option<u64>,
    pub duration_seconds: Option<u64>,
}

impl ScanConfig {
    /// Minimum time between the starts of two scan cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.unwrap_or(10_000))
    }

    /// How long each scan accumulates advertisements before draining.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds.unwrap_or(10))
    }
}
