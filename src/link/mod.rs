//! Binary wire-protocol driver for the pulse oximeter.
//!
//! This is the gateway module for the link layer, following the Explicit
//! Module Boundary Pattern (EMBP) used throughout the crate:
//! - `crc` – the device's CRC-8 checksum
//! - `frame` – command/response framing and payload parsing
//! - `driver` – reassembly, validation, and deduplication of readings
//! - `transport` – the BLE seam (`LinkTransport`) and its btleplug binding
//! - `mock` – synthetic transport that emits realistic wire frames
//!
//! Siblings stay private; everything the rest of the crate needs is
//! re-exported here.

mod crc;
mod driver;
mod frame;
mod mock;
mod transport;

// ---

pub use crc::crc8;
pub use driver::LinkDriver;
pub use frame::{build_command, build_response, parse_payload, FrameHeader, CMD_READ_SENSOR, SENSOR_PAYLOAD_LEN};
pub use mock::MockTransport;
pub use transport::{BleTransport, LinkTransport, RX_CHAR_UUID, TX_CHAR_UUID};
