//! Core data model for the monitoring engine.
//!
//! Everything that crosses a task boundary lives here as an immutable value:
//! readings published by the link driver, therapy samples from the power
//! monitor, adapter records owned by the adapter manager, and the alert
//! events produced each evaluation tick. Snapshots are cloned into watch
//! channels rather than shared behind long-held locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Where a reading entered the system.
///
/// Relay-sourced readings (submitted by the phone app when the wearer is out
/// of radio range) flow through the identical evaluation and persistence
/// path as locally decoded ones; only the tag differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Link,
    Relay,
}

/// One decoded pulse-oximeter reading.
///
/// Invalid readings (sensor off or idle) are retained for display continuity
/// but carry `valid: false` and are excluded from alert-condition
/// evaluation. `spo2` is `None` when the sensor had no contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub spo2: Option<u8>,
    pub heart_rate: u8,
    pub battery_level: u8,
    pub movement: u8,
    pub valid: bool,
}

impl Reading {
    /// Age of this reading in whole seconds at `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

// ---

/// Power state of the auxiliary therapy (BiPAP) device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TherapyState {
    On,
    Off,
    Unknown,
}

impl TherapyState {
    /// Whether therapy should be treated as active for alert gating.
    ///
    /// Unknown is conservatively treated as "off" so alerts are not
    /// suppressed while the power meter is unreachable.
    pub fn is_active(self) -> bool {
        matches!(self, TherapyState::On)
    }
}

/// A classified power sample from the auxiliary monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TherapySample {
    pub state: TherapyState,
    pub last_power_watts: Option<f64>,
    pub sampled_at: DateTime<Utc>,
}

impl Default for TherapySample {
    fn default() -> Self {
        Self {
            state: TherapyState::Unknown,
            last_power_watts: None,
            sampled_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

// ---

/// Operational state of one configured radio adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterState {
    Up,
    Down,
    Offline,
}

/// One configured radio adapter, mutated only by the adapter manager.
///
/// Invariant: at most one adapter is `Up` for active use outside a bounded
/// switching transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRecord {
    pub name: String,
    pub hardware_address: String,
    pub interface_id: Option<u32>,
    pub state: AdapterState,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AdapterRecord {
    pub fn new(name: impl Into<String>, hardware_address: impl Into<String>) -> Self {
        let name = name.into();
        // "hci0" -> 0; names without a trailing index get no interface id
        let interface_id = name
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .ok();
        Self {
            name,
            hardware_address: hardware_address.into(),
            interface_id,
            state: AdapterState::Down,
            last_seen: None,
        }
    }
}

/// Connection-health counters for the active link.
///
/// Mutated on every connect attempt; fully reset by a successful reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHealth {
    pub consecutive_failures: u32,
    pub outage_started_at: Option<DateTime<Utc>>,
    pub last_recovery_action_at: Option<DateTime<Utc>>,
}

// ---

/// Alert severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    High,
    Critical,
}

/// The alert conditions the evaluator knows how to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Spo2Critical,
    Spo2Warning,
    HeartRateHigh,
    HeartRateLow,
    BatteryLow,
    Disconnect,
    NoTherapyDuringSleep,
    AdapterDisconnect,
}

impl AlertType {
    /// Short human-readable label used in alert messages.
    pub fn label(self) -> &'static str {
        match self {
            AlertType::Spo2Critical => "SpO2 critical",
            AlertType::Spo2Warning => "SpO2 low",
            AlertType::HeartRateHigh => "heart rate high",
            AlertType::HeartRateLow => "heart rate low",
            AlertType::BatteryLow => "sensor battery low",
            AlertType::Disconnect => "oximeter disconnected",
            AlertType::NoTherapyDuringSleep => "no therapy during sleep hours",
            AlertType::AdapterDisconnect => "radio adapter missing",
        }
    }
}

/// Whether an alert event opens or closes a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Fired,
    Resolved,
}

/// One alert event produced by the evaluator.
///
/// A `Resolved` event reuses the id of the `Fired` event it closes, so the
/// delivery collaborator can match `resolve(id)` calls to open incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub reading: Option<Reading>,
    pub therapy: TherapyState,
    pub transition: Transition,
}

// ---

/// The single display-facing summary state.
///
/// Derived on demand by the status aggregator; never stored as an
/// independent source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadlineStatus {
    Initializing,
    Disconnected,
    Late,
    TherapyActive,
    Normal,
    Warning,
    Alarm,
    Silenced,
}
