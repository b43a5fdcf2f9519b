use std::collections::HashMap;
use std::pin::Pin;
use std::time::{Duration, Instant};

use anyhow::Result;
use btleplug::api::{Central as _, CentralEvent, Peripheral as _, ScanFilter};
use futures::{FutureExt as _, Stream, StreamExt as _};
use log::debug;
use mac_address::MacAddress;

use crate::messages::ObservedAdvertisement;

/// What the scan cycle needs from a BLE backend: a fire-and-forget scan
/// start, and a later retrieval that also clears the backend's buffer.
#[allow(async_fn_in_trait)]
pub trait AdvertisementSource {
    async fn start_scan(&mut self) -> Result<()>;
    async fn collect(&mut self) -> Result<Vec<ObservedAdvertisement>>;
}

pub struct BtleSource {
    adapter: btleplug::platform::Adapter,
    events: Option<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>>,
}

impl BtleSource {
    pub fn new(adapter: btleplug::platform::Adapter) -> Self {
        BtleSource {
            adapter,
            events: None,
        }
    }
}

impl AdvertisementSource for BtleSource {
    async fn start_scan(&mut self) -> Result<()> {
        // Subscribe before starting so the window misses nothing.
        self.events = Some(self.adapter.events().await?);
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    /// Drain the manufacturer-data events that arrived during this scan
    /// window. Dropping the stream afterwards discards its buffer, so a
    /// sensor that has gone silent is not re-observed from a stale cache on
    /// the next cycle.
    async fn collect(&mut self) -> Result<Vec<ObservedAdvertisement>> {
        self.adapter.stop_scan().await?;

        let mut observed = Vec::new();
        let Some(mut events) = self.events.take() else {
            return Ok(observed);
        };
        while let Some(Some(event)) = events.next().now_or_never() {
            let CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } = event
            else {
                continue;
            };
            let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                debug!("advertiser {id:?} vanished before properties lookup");
                continue;
            };
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            let Some(rssi) = properties.rssi else {
                continue;
            };
            let address = MacAddress::new(properties.address.into_inner());
            observed.extend(reassemble_payloads(address, rssi, &manufacturer_data));
        }
        Ok(observed)
    }
}

/// The host stack splits off the two company-id bytes, but the RAPT
/// signature spans them. Reassemble the on-air blob for each entry.
fn reassemble_payloads(
    address: MacAddress,
    rssi: i16,
    manufacturer_data: &HashMap<u16, Vec<u8>>,
) -> Vec<ObservedAdvertisement> {
    manufacturer_data
        .iter()
        .map(|(company_id, data)| {
            let mut payload = company_id.to_le_bytes().to_vec();
            payload.extend_from_slice(data);
            ObservedAdvertisement {
                address,
                rssi,
                payload,
            }
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CycleState {
    Idle { last_start: Option<Instant> },
    Scanning { started: Instant },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleStep {
    /// Ask the source to begin a non-blocking scan.
    StartScan,
    /// The scan window has elapsed; results are ready to drain.
    Drain,
}

/// Two-state scan timing machine. A scan in progress is never restarted and
/// results are never drained before the window has elapsed; the states make
/// any other transition unrepresentable.
#[derive(Debug)]
pub struct ScanCycle {
    interval: Duration,
    duration: Duration,
    state: CycleState,
}

impl ScanCycle {
    pub fn new(interval: Duration, duration: Duration) -> Self {
        ScanCycle {
            interval,
            duration,
            state: CycleState::Idle { last_start: None },
        }
    }

    /// Advance the state machine; at most one step fires per call. The first
    /// poll starts a scan immediately. `Instant` arithmetic saturates, so a
    /// time source hiccup cannot fire a transition early.
    pub fn poll(&mut self, now: Instant) -> Option<CycleStep> {
        match self.state {
            CycleState::Idle { last_start } => {
                if last_start.is_none_or(|t| now.duration_since(t) >= self.interval) {
                    self.state = CycleState::Scanning { started: now };
                    Some(CycleStep::StartScan)
                } else {
                    None
                }
            }
            CycleState::Scanning { started } => {
                if now.duration_since(started) >= self.duration {
                    self.state = CycleState::Idle {
                        last_start: Some(started),
                    };
                    Some(CycleStep::Drain)
                } else {
                    None
                }
            }
        }
    }
}
