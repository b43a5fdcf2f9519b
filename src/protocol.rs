use thiserror::Error;

use crate::messages::{Reading, SignalQuality};

/// Every RAPT Pill advertisement starts with the ASCII bytes "RAPT".
pub const MAGIC: [u8; 4] = [0x52, 0x41, 0x50, 0x54];

/// Shortest payload that carries every field we read, battery included.
pub const MIN_PAYLOAD_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short: {0} bytes, need at least {MIN_PAYLOAD_LEN}")]
    TooShort(usize),
    #[error("payload does not start with the RAPT signature")]
    BadHeader,
}

fn be_f32(payload: &[u8], at: usize) -> f32 {
    f32::from_be_bytes([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]])
}

fn round_dp(value: f32, factor: f32) -> f32 {
    (value * factor).round() / factor
}

/// Decode one raw RAPT Pill advertisement payload into a [`Reading`].
///
/// All multi-byte fields are big-endian except the battery level, which the
/// Pill sends with the high byte at the later offset. That reversed order
/// may be a quirk in the sensor's protocol mapping, but it is the observed
/// wire behavior and is preserved exactly.
pub fn decode(payload: &[u8], rssi: i16) -> Result<Reading, DecodeError> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::TooShort(payload.len()));
    }
    if payload[..4] != MAGIC {
        return Err(DecodeError::BadHeader);
    }

    // Byte 6 is the message subtype; only subtype 0x01 carries a velocity.
    let gravity_velocity = if payload[6] == 0x01 { be_f32(payload, 7) } else { 0.0 };

    let temp_raw = u16::from_be_bytes([payload[11], payload[12]]);
    let temperature = round_dp(f32::from(temp_raw) / 128.0 - 273.15, 100.0);

    let specific_gravity = round_dp(be_f32(payload, 13) / 1000.0, 10_000.0);

    let battery_raw = (u16::from(payload[23]) << 8) | u16::from(payload[22]);
    let battery = (f32::from(battery_raw) / 256.0).min(100.0);

    Ok(Reading {
        gravity_velocity,
        temperature,
        specific_gravity,
        battery,
        rssi,
        signal_quality: SignalQuality::from_rssi(rssi),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal 24-byte payload with the given field values.
    fn payload(
        subtype: u8,
        velocity: f32,
        temp_raw: u16,
        gravity_raw: f32,
        battery_raw: u16,
    ) -> Vec<u8> {
        let mut p = vec![0u8; MIN_PAYLOAD_LEN];
        p[..4].copy_from_slice(&MAGIC);
        p[6] = subtype;
        p[7..11].copy_from_slice(&velocity.to_be_bytes());
        p[11..13].copy_from_slice(&temp_raw.to_be_bytes());
        p[13..17].copy_from_slice(&gravity_raw.to_be_bytes());
        // Battery bytes go out low byte first.
        p[22] = (battery_raw & 0xff) as u8;
        p[23] = (battery_raw >> 8) as u8;
        p
    }

    #[test]
    fn decodes_all_fields() {
        let reading = decode(&payload(0x01, 1.25, 38466, 1050.0, 20000), -60).unwrap();
        assert_eq!(reading.gravity_velocity, 1.25);
        assert_eq!(reading.temperature, 27.37);
        assert_eq!(reading.specific_gravity, 1.05);
        assert_eq!(reading.battery, 78.125);
        assert_eq!(reading.rssi, -60);
        assert_eq!(reading.signal_quality, SignalQuality::Good);
    }

    #[test]
    fn velocity_requires_subtype_one() {
        let reading = decode(&payload(0x02, 1.25, 38466, 1050.0, 20000), -60).unwrap();
        assert_eq!(reading.gravity_velocity, 0.0);
    }

    #[test]
    fn short_payload_rejected() {
        for len in 0..MIN_PAYLOAD_LEN {
            let mut p = payload(0x01, 1.25, 38466, 1050.0, 20000);
            p.truncate(len);
            assert_eq!(decode(&p, -60), Err(DecodeError::TooShort(len)));
        }
    }

    #[test]
    fn corrupt_header_rejected() {
        for i in 0..4 {
            let mut p = payload(0x01, 1.25, 38466, 1050.0, 20000);
            p[i] ^= 0xff;
            assert_eq!(decode(&p, -60), Err(DecodeError::BadHeader));
        }
    }

    #[test]
    fn battery_clamped_at_100() {
        // 51200 / 256 = 200, clamps to 100.
        let reading = decode(&payload(0x01, 0.0, 38466, 1050.0, 51200), -60).unwrap();
        assert_eq!(reading.battery, 100.0);
    }

    #[test]
    fn battery_bytes_are_reversed() {
        // Natural big-endian order would give (0x20 << 8) | 0x4E = 8270;
        // byte[23] is the high byte, so raw = 0x4E20 = 20000 -> 78.125.
        let mut p = payload(0x01, 0.0, 38466, 1050.0, 0);
        p[22] = 0x20;
        p[23] = 0x4e;
        let reading = decode(&p, -60).unwrap();
        assert_eq!(reading.battery, 78.125);
    }

    #[test]
    fn rssi_bucket_boundaries() {
        assert_eq!(SignalQuality::from_rssi(-50), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-51), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-70), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-71), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-85), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-86), SignalQuality::Weak);
    }
}
