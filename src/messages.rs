use mac_address::MacAddress;
use serde_derive::Serialize;

/// One advertisement picked up during a scan cycle. Produced by the scanner,
/// consumed within the same cycle, never persisted.
#[derive(Clone, Debug)]
pub struct ObservedAdvertisement {
    pub address: MacAddress,
    pub rssi: i16,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Weak,
}

impl SignalQuality {
    /// Bucket a received signal strength (dBm). Boundaries are inclusive on
    /// the lower end of each bucket.
    pub fn from_rssi(rssi: i16) -> Self {
        if rssi >= -50 {
            SignalQuality::Excellent
        } else if rssi >= -70 {
            SignalQuality::Good
        } else if rssi >= -85 {
            SignalQuality::Fair
        } else {
            SignalQuality::Weak
        }
    }
}

/// A decoded RAPT Pill measurement, ready to publish.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub gravity_velocity: f32,
    /// Degrees Celsius, rounded to 2 decimal places.
    pub temperature: f32,
    /// Rounded to 4 decimal places.
    pub specific_gravity: f32,
    /// Percent, clamped to 100.
    pub battery: f32,
    pub rssi: i16,
    pub signal_quality: SignalQuality,
}
