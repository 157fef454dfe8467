//! `pulsewatch` – monitoring engine for a BLE pulse-oximeter life-safety
//! monitor.
//!
//! The crate is organized around five cooperating components:
//! - [`link`] – binary wire protocol driver over a BLE transport
//! - [`adapters`] – radio-adapter failover and stuck-link recovery
//! - [`therapy`] – auxiliary power monitor classifying the therapy device
//! - [`alerts`] – therapy-aware, duration-gated, escalating alert rules
//! - [`status`] – the pure headline-status projection
//!
//! [`runtime`] wires them into tokio tasks; [`config`] holds the full
//! configuration surface; [`models`] the shared value types; [`sinks`] the
//! persistence and delivery seams. Modules follow the Explicit Module
//! Boundary Pattern (EMBP): gateways re-export what the rest of the crate
//! may touch, siblings stay private.

pub mod adapters;
pub mod alerts;
pub mod config;
pub mod error;
pub mod link;
pub mod models;
pub mod runtime;
pub mod sinks;
pub mod status;
pub mod therapy;

// ---

pub use config::Config;
pub use error::MonitorError;
pub use runtime::{Monitor, MonitorHandle};
