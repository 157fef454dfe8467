//! Command/response framing for the oximeter's binary protocol.
//!
//! Wire format (bit-exact, reproduced from the device):
//! - Command frame (8 bytes, no payload): `0xAA`, command byte `c`,
//!   `0xFF ^ c`, two zero block-id bytes, two zero payload-length bytes,
//!   trailing CRC-8 over bytes 0..=6.
//! - Response frame: `0x55`, response type, its one's complement, 2-byte
//!   block id, 2-byte little-endian payload length `L`, `L` payload bytes,
//!   one trailing CRC-8 byte covering everything before it. Total length
//!   is `7 + L + 1`.

use chrono::{DateTime, Utc};

use super::crc::crc8;
use crate::models::Reading;

/// Command byte requesting current sensor values.
pub const CMD_READ_SENSOR: u8 = 0x17;

/// Payload length of a sensor-reading response.
pub const SENSOR_PAYLOAD_LEN: usize = 0x0D;

/// Response frames start with this marker byte.
pub const RESPONSE_MARKER: u8 = 0x55;

/// Bytes before the payload in a response frame.
pub const HEADER_LEN: usize = 7;

// ---

/// Build a framed command packet.
pub fn build_command(cmd: u8) -> [u8; 8] {
    // ---
    let mut pkt = [0xAA, cmd, 0xFF ^ cmd, 0x00, 0x00, 0x00, 0x00, 0x00];
    pkt[7] = crc8(&pkt[..7]);
    pkt
}

/// Build a complete response frame around `payload`.
///
/// Used by the mock transport and by tests; the real device produces these.
pub fn build_response(response_type: u8, payload: &[u8]) -> Vec<u8> {
    // ---
    let len = payload.len() as u16;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + 1);
    frame.push(RESPONSE_MARKER);
    frame.push(response_type);
    frame.push(0xFF ^ response_type);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame));
    frame
}

/// Parsed header of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub response_type: u8,
    pub block_id: u16,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Parse the 7-byte header. `bytes` must hold at least `HEADER_LEN`
    /// bytes starting at the `0x55` marker.
    pub fn parse(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= HEADER_LEN && bytes[0] == RESPONSE_MARKER);
        Self {
            response_type: bytes[1],
            block_id: u16::from_le_bytes([bytes[3], bytes[4]]),
            payload_len: u16::from_le_bytes([bytes[5], bytes[6]]) as usize,
        }
    }

    /// Total frame length including marker, header, payload, and CRC.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload_len + 1
    }
}

// ---

/// Decode a 13-byte sensor payload into a [`Reading`] stamped at `now`.
///
/// Layout: byte0 = spo2, byte1 = heart rate, byte2 = status flag,
/// byte7 = battery, byte9 = movement; remaining bytes reserved.
///
/// Validity: flag `0xFF` means no sensor contact; flag `0x00` with both
/// spo2 and heart rate zero means the sensor is idle. Invalid readings are
/// still produced (for display continuity) with `valid: false` and no spo2.
pub fn parse_payload(payload: &[u8], now: DateTime<Utc>) -> Option<Reading> {
    // ---
    if payload.len() < SENSOR_PAYLOAD_LEN {
        return None;
    }

    let spo2 = payload[0];
    let heart_rate = payload[1];
    let flag = payload[2];
    let battery_level = payload[7];
    let movement = payload[9];

    let valid = !(flag == 0xFF || (flag == 0x00 && spo2 == 0 && heart_rate == 0));

    Some(Reading {
        timestamp: now,
        spo2: valid.then_some(spo2),
        heart_rate,
        battery_level,
        movement,
        valid,
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn sensor_payload(spo2: u8, hr: u8, flag: u8) -> [u8; SENSOR_PAYLOAD_LEN] {
        // ---
        let mut p = [0u8; SENSOR_PAYLOAD_LEN];
        p[0] = spo2;
        p[1] = hr;
        p[2] = flag;
        p[7] = 85; // battery
        p[9] = 2; // movement
        p
    }

    #[test]
    fn reading_request_frame_is_bit_exact() {
        // ---
        assert_eq!(
            build_command(CMD_READ_SENSOR),
            [0xAA, 0x17, 0xE8, 0x00, 0x00, 0x00, 0x00, 0x1B]
        );
    }

    #[test]
    fn response_round_trip_preserves_header_fields() {
        // ---
        let payload = sensor_payload(97, 72, 0x01);
        let frame = build_response(CMD_READ_SENSOR, &payload);

        assert_eq!(frame.len(), HEADER_LEN + SENSOR_PAYLOAD_LEN + 1);
        assert_eq!(frame[0], RESPONSE_MARKER);
        assert_eq!(frame[2], 0xFF ^ CMD_READ_SENSOR);

        let header = FrameHeader::parse(&frame);
        assert_eq!(header.response_type, CMD_READ_SENSOR);
        assert_eq!(header.payload_len, SENSOR_PAYLOAD_LEN);
        assert_eq!(header.total_len(), frame.len());

        // Trailing CRC covers everything before it.
        assert_eq!(*frame.last().unwrap(), crc8(&frame[..frame.len() - 1]));
    }

    #[test]
    fn flag_ff_classified_invalid_no_contact() {
        // ---
        let r = parse_payload(&sensor_payload(97, 72, 0xFF), Utc::now()).unwrap();
        assert!(!r.valid);
        assert_eq!(r.spo2, None);
    }

    #[test]
    fn zero_flag_with_zero_vitals_classified_idle() {
        // ---
        let r = parse_payload(&sensor_payload(0, 0, 0x00), Utc::now()).unwrap();
        assert!(!r.valid);
    }

    #[test]
    fn zero_flag_with_vitals_is_valid() {
        // ---
        // flag 0x00 alone does not invalidate: both vitals must also be zero.
        let r = parse_payload(&sensor_payload(96, 70, 0x00), Utc::now()).unwrap();
        assert!(r.valid);
        assert_eq!(r.spo2, Some(96));
        assert_eq!(r.heart_rate, 70);
        assert_eq!(r.battery_level, 85);
        assert_eq!(r.movement, 2);
    }

    #[test]
    fn nonzero_flag_is_valid_regardless_of_vitals() {
        // ---
        let r = parse_payload(&sensor_payload(0, 0, 0x01), Utc::now()).unwrap();
        assert!(r.valid);
    }

    #[test]
    fn short_payload_rejected() {
        // ---
        assert!(parse_payload(&[97, 72, 0x01], Utc::now()).is_none());
    }
}
