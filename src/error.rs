//! Error taxonomy for the monitoring core.
//!
//! Every variant here is recoverable by design: nothing in the core is
//! permitted to terminate the process. Framing errors drop a frame and move
//! on, link loss drives the adapter manager's escalation tiers, and external
//! collaborator failures (power meter, alert delivery) degrade to
//! Unknown/logged rather than propagating out of the tick loop.

use thiserror::Error;

// ---

/// Recoverable errors raised by the monitoring core.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A wire frame failed CRC or arrived truncated. The frame is dropped
    /// silently; the reassembly buffer is retained.
    #[error("protocol framing error: {0}")]
    ProtocolFraming(String),

    /// The underlying notification stream was lost. Drives the adapter
    /// manager's failover and recovery escalation.
    #[error("link disconnected: {0}")]
    LinkDisconnected(String),

    /// A configured radio adapter is not present on the system. Raised as a
    /// per-adapter alert condition, independent of the others.
    #[error("adapter unavailable: {adapter}")]
    AdapterUnavailable { adapter: String },

    /// The auxiliary power-metering device could not be reached. Classified
    /// as therapy-state Unknown and retried on the next poll.
    #[error("auxiliary device unreachable: {0}")]
    AuxiliaryDeviceUnreachable(String),

    /// An alert could not be handed to the delivery collaborator. Logged,
    /// never blocks the evaluation loop. The built-in log sink cannot
    /// fail; this is the error real `AlertSink` implementations return.
    #[error("alert delivery failed: {0}")]
    AlertDelivery(String),
}
