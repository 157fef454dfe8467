//! Synthetic transport for running the full pipeline without hardware.
//!
//! Enabled by `mock_mode` / `MOCK_HARDWARE`. The mock answers each reading
//! request with realistic wire frames: values wander deterministically
//! around healthy vitals, frames arrive fragmented the way BLE MTUs split
//! them, and each request is answered twice to exercise the driver's
//! deduplication, matching the real device's habit of repeating
//! notifications.

use std::collections::VecDeque;
use std::time::Duration;

use super::frame::{build_response, CMD_READ_SENSOR, SENSOR_PAYLOAD_LEN};
use crate::error::MonitorError;
use crate::link::transport::LinkTransport;

// ---

/// Simulated oximeter link.
pub struct MockTransport {
    pending: VecDeque<Vec<u8>>,
    step: u64,
    battery: u8,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            step: 0,
            battery: 85,
        }
    }

    fn next_payload(&mut self) -> [u8; SENSOR_PAYLOAD_LEN] {
        // ---
        self.step += 1;
        // Deterministic wander: SpO2 95-99, HR 64-78.
        let spo2 = 95 + (self.step % 5) as u8;
        let hr = 64 + ((self.step * 3) % 15) as u8;
        if self.step % 360 == 0 && self.battery > 0 {
            self.battery -= 1;
        }

        let mut payload = [0u8; SENSOR_PAYLOAD_LEN];
        payload[0] = spo2;
        payload[1] = hr;
        payload[2] = 0x01; // sensor on finger
        payload[7] = self.battery;
        payload[9] = (self.step % 4) as u8;
        payload
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTransport for MockTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), MonitorError> {
        // ---
        if frame.len() >= 2 && frame[1] == CMD_READ_SENSOR {
            let payload = self.next_payload();
            let response = build_response(CMD_READ_SENSOR, &payload);

            // Fragment at a typical notify-MTU boundary, then repeat the
            // whole frame once, as the device does.
            let split = response.len() / 2;
            self.pending.push_back(response[..split].to_vec());
            self.pending.push_back(response[split..].to_vec());
            self.pending.push_back(response);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        // ---
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(chunk);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::link::driver::LinkDriver;
    use chrono::Utc;

    #[tokio::test]
    async fn mock_answers_reading_request_with_decodable_frames() {
        // ---
        let mut transport = MockTransport::new();
        let mut driver = LinkDriver::new(1);

        transport
            .send(&LinkDriver::reading_request())
            .await
            .unwrap();

        let mut readings = Vec::new();
        for _ in 0..3 {
            let chunk = transport.recv().await.unwrap();
            readings.extend(driver.on_notification(&chunk, Utc::now()));
        }

        // Fragments plus a duplicate decode to exactly one reading.
        assert_eq!(readings.len(), 1);
        assert!(readings[0].valid);
        let spo2 = readings[0].spo2.unwrap();
        assert!((95..=99).contains(&spo2), "spo2 out of band: {spo2}");
    }
}
