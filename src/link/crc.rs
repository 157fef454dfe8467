//! CRC-8 checksum used by the oximeter's wire protocol.
//!
//! The device computes a byte-at-a-time CRC driven by a fixed constant
//! table. The constants and the reseed-per-byte structure below are the
//! algorithm's full definition (it coincides with CRC-8 poly 0x07, zero
//! init, which the test vectors pin down).

// One constant per bit of `crc XOR byte`, lowest bit first.
const BIT_CONSTANTS: [u8; 8] = [0x07, 0x0e, 0x1c, 0x38, 0x70, 0xe0, 0xc7, 0x89];

// ---

/// Compute the protocol CRC-8 over `data`.
pub fn crc8(data: &[u8]) -> u8 {
    // ---
    let mut crc: u8 = 0x00;
    for &byte in data {
        let chk = crc ^ byte;
        crc = 0x00;
        for (bit, &constant) in BIT_CONSTANTS.iter().enumerate() {
            if chk & (1 << bit) != 0 {
                crc ^= constant;
            }
        }
    }
    crc
}
