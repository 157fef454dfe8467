//! Multi-adapter link-failover management.
//!
//! Gateway module (EMBP): `manager` holds the failover state machine, which
//! is fully synchronous and decides *what* to do; `bluez` holds the
//! `RadioControl` capability seam that actually touches the OS Bluetooth
//! stack. Keeping decisions and I/O apart means no lock is ever held across
//! an OS call and the switching algorithm is testable on a bare clock.

mod bluez;
mod manager;

// ---

pub use bluez::{BlueZRadio, RadioControl};
pub use manager::{execute_actions, AdapterManager, RecoveryAction};
