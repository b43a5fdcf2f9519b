use std::collections::HashSet;

use log::debug;
use mac_address::MacAddress;

use crate::config::Device;
use crate::messages::ObservedAdvertisement;

/// The monitored-device table, built once from config and read-only after.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<Device>) -> Self {
        DeviceRegistry { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// First entry with a matching address wins. `MacAddress` compares by
    /// bytes, so hex case in the config or from the scanner is irrelevant.
    pub fn name_for(&self, address: &MacAddress) -> Option<&str> {
        self.devices
            .iter()
            .find(|d| d.address == *address)
            .map(|d| d.name.as_str())
    }
}

/// Payloads already handled in the current scan cycle, keyed by their hex
/// encoding. Cleared when the cycle drains.
#[derive(Debug, Default)]
pub struct DedupeSet {
    seen: HashSet<String>,
}

impl DedupeSet {
    pub fn new() -> Self {
        DedupeSet::default()
    }

    fn key(payload: &[u8]) -> String {
        payload.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Returns false when the payload was already seen this cycle.
    pub fn insert(&mut self, payload: &[u8]) -> bool {
        self.seen.insert(Self::key(payload))
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Decide whether an advertisement should be decoded. Unmonitored addresses
/// and repeated payloads are dropped before any decoding cost is paid.
pub fn admit<'a>(
    adv: &ObservedAdvertisement,
    registry: &'a DeviceRegistry,
    dedupe: &mut DedupeSet,
) -> Option<&'a str> {
    let name = registry.name_for(&adv.address)?;
    if !dedupe.insert(&adv.payload) {
        debug!("duplicate payload from {} ({name}) this cycle", adv.address);
        return None;
    }
    Some(name)
}
