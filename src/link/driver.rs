//! Reassembly, validation, and deduplication of oximeter notifications.
//!
//! The driver is pure with respect to I/O: bytes go in via
//! [`LinkDriver::on_notification`], decoded [`Reading`]s come out. The
//! owning task feeds it from the transport's notification stream and
//! publishes emitted readings; time is injected so the dedup window is
//! deterministic under test.

use chrono::{DateTime, Duration, Utc};

use super::crc::crc8;
use super::frame::{
    build_command, parse_payload, FrameHeader, CMD_READ_SENSOR, HEADER_LEN, RESPONSE_MARKER,
    SENSOR_PAYLOAD_LEN,
};
use crate::error::MonitorError;
use crate::models::Reading;

// ---

/// Stateful decoder for the oximeter's notification stream.
pub struct LinkDriver {
    rx: Vec<u8>,
    dedup_gap: Duration,
    last_emit_at: Option<DateTime<Utc>>,
}

impl LinkDriver {
    /// Create a driver with the given minimum gap between emitted readings.
    pub fn new(dedup_gap_secs: u64) -> Self {
        Self {
            rx: Vec::new(),
            dedup_gap: Duration::seconds(dedup_gap_secs as i64),
            last_emit_at: None,
        }
    }

    /// The framed 0x17 command requesting current sensor values.
    pub fn reading_request() -> [u8; 8] {
        build_command(CMD_READ_SENSOR)
    }

    /// Feed raw notification bytes into the reassembly buffer and decode
    /// any complete frames.
    ///
    /// The device may answer one request with several near-identical
    /// notifications; at most one reading is emitted per rolling dedup gap,
    /// and notifications inside the gap are dropped without being buffered
    /// as pending output. Frames failing CRC are dropped silently with the
    /// rest of the buffer retained.
    pub fn on_notification(&mut self, bytes: &[u8], now: DateTime<Utc>) -> Vec<Reading> {
        // ---
        self.rx.extend_from_slice(bytes);

        let mut out = Vec::new();
        loop {
            // Resync: discard anything before the next frame marker.
            match self.rx.iter().position(|&b| b == RESPONSE_MARKER) {
                Some(0) => {}
                Some(pos) => {
                    self.rx.drain(..pos);
                }
                None => {
                    self.rx.clear();
                    break;
                }
            }

            if self.rx.len() < HEADER_LEN {
                break;
            }
            let header = FrameHeader::parse(&self.rx);
            let total = header.total_len();
            if self.rx.len() < total {
                break;
            }

            let frame: Vec<u8> = self.rx.drain(..total).collect();
            if crc8(&frame[..total - 1]) != frame[total - 1] {
                // Drop the frame, keep the buffer; framing errors never
                // escalate.
                let err = MonitorError::ProtocolFraming(format!(
                    "bad CRC on response type {:#04x} ({} byte payload)",
                    header.response_type, header.payload_len
                ));
                tracing::debug!(error = %err, "dropping frame");
                continue;
            }

            if header.payload_len != SENSOR_PAYLOAD_LEN {
                tracing::trace!(
                    response_type = header.response_type,
                    payload_len = header.payload_len,
                    "ignoring non-sensor frame"
                );
                continue;
            }

            let payload = &frame[HEADER_LEN..total - 1];
            let Some(reading) = parse_payload(payload, now) else {
                continue;
            };

            let inside_gap = self
                .last_emit_at
                .is_some_and(|t| now - t < self.dedup_gap);
            if inside_gap {
                tracing::trace!("dropping duplicate notification inside dedup gap");
                continue;
            }

            self.last_emit_at = Some(now);
            out.push(reading);
        }
        out
    }

    /// Bytes currently held in the reassembly buffer (diagnostics only).
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::link::frame::build_response;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn sensor_frame(spo2: u8, hr: u8, flag: u8) -> Vec<u8> {
        // ---
        let mut payload = [0u8; SENSOR_PAYLOAD_LEN];
        payload[0] = spo2;
        payload[1] = hr;
        payload[2] = flag;
        payload[7] = 90;
        build_response(CMD_READ_SENSOR, &payload)
    }

    #[test]
    fn whole_frame_decodes_to_one_reading() {
        // ---
        let mut driver = LinkDriver::new(1);
        let out = driver.on_notification(&sensor_frame(97, 72, 0x01), t0());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].spo2, Some(97));
        assert_eq!(out[0].heart_rate, 72);
        assert!(out[0].valid);
        assert_eq!(driver.buffered(), 0);
    }

    #[test]
    fn fragmented_frame_reassembles() {
        // ---
        let mut driver = LinkDriver::new(1);
        let frame = sensor_frame(96, 70, 0x01);

        assert!(driver.on_notification(&frame[..3], t0()).is_empty());
        assert!(driver.on_notification(&frame[3..10], t0()).is_empty());
        let out = driver.on_notification(&frame[10..], t0());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].spo2, Some(96));
    }

    #[test]
    fn duplicates_inside_gap_emit_exactly_one_reading() {
        // ---
        let mut driver = LinkDriver::new(1);
        let frame = sensor_frame(95, 68, 0x01);

        // Three identical notifications within the same second.
        let mut emitted = 0;
        for _ in 0..3 {
            emitted += driver.on_notification(&frame, t0()).len();
        }
        assert_eq!(emitted, 1);

        // After the gap elapses the next notification is emitted again.
        let later = t0() + Duration::seconds(1);
        assert_eq!(driver.on_notification(&frame, later).len(), 1);
    }

    #[test]
    fn dropped_duplicates_are_not_queued() {
        // ---
        let mut driver = LinkDriver::new(1);
        let frame = sensor_frame(95, 68, 0x01);

        driver.on_notification(&frame, t0());
        driver.on_notification(&frame, t0());

        // Nothing pending: advancing time without new bytes produces nothing.
        let later = t0() + Duration::seconds(5);
        assert!(driver.on_notification(&[], later).is_empty());
    }

    #[test]
    fn bad_crc_frame_dropped_following_frame_survives() {
        // ---
        let mut driver = LinkDriver::new(0);
        let mut bad = sensor_frame(90, 60, 0x01);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = sensor_frame(97, 72, 0x01);

        let mut bytes = bad;
        bytes.extend_from_slice(&good);
        let out = driver.on_notification(&bytes, t0());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].spo2, Some(97));
    }

    #[test]
    fn garbage_prefix_is_skipped() {
        // ---
        let mut driver = LinkDriver::new(1);
        let mut bytes = vec![0x00, 0x13, 0x37];
        bytes.extend_from_slice(&sensor_frame(94, 66, 0x01));
        assert_eq!(driver.on_notification(&bytes, t0()).len(), 1);
    }

    #[test]
    fn invalid_reading_still_emitted_for_display() {
        // ---
        let mut driver = LinkDriver::new(1);
        let out = driver.on_notification(&sensor_frame(0, 0, 0xFF), t0());
        assert_eq!(out.len(), 1);
        assert!(!out[0].valid);
        assert_eq!(out[0].spo2, None);
    }

    #[test]
    fn truncated_frame_waits_for_more_bytes() {
        // ---
        let mut driver = LinkDriver::new(1);
        let frame = sensor_frame(97, 72, 0x01);
        driver.on_notification(&frame[..frame.len() - 1], t0());
        assert_eq!(driver.buffered(), frame.len() - 1);
    }
}
