use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::filter::{self, DedupeSet, DeviceRegistry};
use crate::messages::{ObservedAdvertisement, Reading};
use crate::mqtt::{MqttClient, PublishOutcome};
use crate::protocol;
use crate::scanner::{AdvertisementSource, CycleStep, ScanCycle};

/// Cadence of the cooperative poll loop.
const POLL_TICK: Duration = Duration::from_millis(100);

/// The whole pipeline as one explicit context: scan timing, device filter,
/// per-cycle dedupe, and the publisher. Owned by the control loop, no
/// ambient state.
pub struct Gateway<S> {
    source: S,
    registry: DeviceRegistry,
    cycle: ScanCycle,
    dedupe: DedupeSet,
    mqtt: MqttClient,
}

impl<S: AdvertisementSource> Gateway<S> {
    pub fn new(source: S, registry: DeviceRegistry, cycle: ScanCycle, mqtt: MqttClient) -> Self {
        Gateway {
            source,
            registry,
            cycle,
            dedupe: DedupeSet::new(),
            mqtt,
        }
    }

    /// Poll loop: advance the scan cycle, keep the broker session alive
    /// before draining, and push admitted readings out. Nothing in here is
    /// fatal; failed scans, decodes, and publishes are logged and dropped.
    pub async fn run_loop(mut self) -> anyhow::Result<()> {
        info!("gateway started, monitoring {} devices", self.registry.len());
        loop {
            match self.cycle.poll(Instant::now()) {
                Some(CycleStep::StartScan) => {
                    debug!("BLE scan started");
                    if let Err(err) = self.source.start_scan().await {
                        warn!("failed to start BLE scan: {err:?}");
                    }
                }
                Some(CycleStep::Drain) => {
                    self.mqtt.ensure_session().await;
                    match self.source.collect().await {
                        Ok(observed) => self.drain(observed),
                        Err(err) => warn!("failed to collect scan results: {err:?}"),
                    }
                    self.dedupe.clear();
                }
                None => {}
            }
            tokio::time::sleep(POLL_TICK).await;
        }
    }

    fn drain(&mut self, observed: Vec<ObservedAdvertisement>) {
        debug!("scan completed, {} advertisements observed", observed.len());
        let readings = decode_admitted(&self.registry, &mut self.dedupe, &observed);
        for (name, reading) in readings {
            info!(
                "new reading from {name}: SG {:.4}, {:.2} C, battery {:.1}%",
                reading.specific_gravity, reading.temperature, reading.battery
            );
            match self.mqtt.publish_reading(name, &reading) {
                PublishOutcome::Published => debug!("published reading for {name}"),
                PublishOutcome::Failed(reason) => warn!("publish failed for {name}: {reason}"),
            }
        }
    }
}

/// Run one cycle's observations through the filter and decoder, in order.
/// Decode failures are logged and skipped; the cycle always completes.
fn decode_admitted<'a>(
    registry: &'a DeviceRegistry,
    dedupe: &mut DedupeSet,
    observed: &[ObservedAdvertisement],
) -> Vec<(&'a str, Reading)> {
    let mut readings = Vec::new();
    for adv in observed {
        let Some(name) = filter::admit(adv, registry, dedupe) else {
            continue;
        };
        match protocol::decode(&adv.payload, adv.rssi) {
            Ok(reading) => readings.push((name, reading)),
            Err(err) => debug!("undecodable payload from {name}: {err}"),
        }
    }
    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Device;

    fn sample_payload() -> Vec<u8> {
        let mut p = vec![0u8; protocol::MIN_PAYLOAD_LEN];
        p[..4].copy_from_slice(&protocol::MAGIC);
        p[6] = 0x01;
        p[13..17].copy_from_slice(&1050.0f32.to_be_bytes());
        p
    }

    fn adv(rssi: i16, payload: Vec<u8>) -> ObservedAdvertisement {
        ObservedAdvertisement {
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            rssi,
            payload,
        }
    }

    #[test]
    fn duplicate_payloads_decode_once() {
        let registry = DeviceRegistry::new(vec![Device {
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            name: "Red Pill".to_string(),
        }]);
        let mut dedupe = DedupeSet::new();

        // Same payload observed twice with different signal strength.
        let observed = vec![adv(-60, sample_payload()), adv(-80, sample_payload())];
        let readings = decode_admitted(&registry, &mut dedupe, &observed);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].0, "Red Pill");
        assert_eq!(readings[0].1.specific_gravity, 1.05);

        // Next cycle starts with a cleared set, so the payload is admitted again.
        dedupe.clear();
        let readings = decode_admitted(&registry, &mut dedupe, &observed);
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn undecodable_and_unmonitored_advertisements_skipped() {
        let registry = DeviceRegistry::new(vec![Device {
            address: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            name: "Red Pill".to_string(),
        }]);
        let mut dedupe = DedupeSet::new();

        let mut garbled = sample_payload();
        garbled[0] = 0x00;
        let unmonitored = ObservedAdvertisement {
            address: "11:22:33:44:55:66".parse().unwrap(),
            rssi: -60,
            payload: sample_payload(),
        };

        let observed = vec![adv(-60, garbled), unmonitored, adv(-60, sample_payload())];
        let readings = decode_admitted(&registry, &mut dedupe, &observed);
        assert_eq!(readings.len(), 1);
    }
}
