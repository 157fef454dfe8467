//! Status aggregation.
//!
//! The headline status is a pure projection of the latest link, therapy,
//! alert, and silence facts. It is recomputed on demand and never stored,
//! so it can never drift out of sync with the state it summarizes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StatusConfig;
use crate::models::{
    AdapterRecord, AlertSeverity, HeadlineStatus, Reading, TherapySample, TherapyState,
};

// ---

/// Everything the headline projection looks at.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    /// Most recent reading, valid or not; `None` before the first reading
    /// of the process lifetime.
    pub last_reading: Option<&'a Reading>,
    pub therapy: TherapyState,
    /// Highest severity among alerts that have fired and not resolved.
    pub active_severity: Option<AlertSeverity>,
    pub silenced: bool,
    pub now: DateTime<Utc>,
}

/// Derive the single display-facing status.
///
/// Precedence, highest first: alarm, silenced, disconnected, late,
/// therapy active, warning, normal. An active alarm outranks silence so
/// the display can never hide a live critical condition.
pub fn headline(cfg: &StatusConfig, input: &StatusInputs<'_>) -> HeadlineStatus {
    // ---
    if input
        .active_severity
        .is_some_and(|s| s >= AlertSeverity::High)
    {
        return HeadlineStatus::Alarm;
    }
    if input.silenced {
        return HeadlineStatus::Silenced;
    }

    let Some(reading) = input.last_reading else {
        return HeadlineStatus::Initializing;
    };
    let age = reading.age_secs(input.now);
    if age > cfg.disconnected_after_secs as i64 {
        return HeadlineStatus::Disconnected;
    }
    if age > cfg.late_after_secs as i64 {
        return HeadlineStatus::Late;
    }

    if input.therapy.is_active() {
        return HeadlineStatus::TherapyActive;
    }
    if input.active_severity.is_some() {
        return HeadlineStatus::Warning;
    }
    HeadlineStatus::Normal
}

// ---

/// Point-in-time summary served to polling clients (dashboard, relay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub headline: HeadlineStatus,
    pub last_reading: Option<Reading>,
    pub therapy: TherapySample,
    pub adapters: Vec<AdapterRecord>,
    pub silence_remaining_secs: Option<i64>,
    /// Hint for the phone relay: local radio coverage has lapsed, submit
    /// readings over the network path.
    pub needs_relay: bool,
    pub generated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn build(
        cfg: &StatusConfig,
        input: &StatusInputs<'_>,
        therapy: TherapySample,
        adapters: Vec<AdapterRecord>,
        silence_remaining_secs: Option<i64>,
    ) -> Self {
        // ---
        let headline = headline(cfg, input);
        let needs_relay = matches!(
            headline,
            HeadlineStatus::Disconnected | HeadlineStatus::Initializing
        );
        Self {
            headline,
            last_reading: input.last_reading.cloned(),
            therapy,
            adapters,
            silence_remaining_secs,
            needs_relay,
            generated_at: input.now,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn reading_at(at: DateTime<Utc>) -> Reading {
        Reading {
            timestamp: at,
            spo2: Some(97),
            heart_rate: 70,
            battery_level: 80,
            movement: 0,
            valid: true,
        }
    }

    fn base<'a>(reading: Option<&'a Reading>, now: DateTime<Utc>) -> StatusInputs<'a> {
        StatusInputs {
            last_reading: reading,
            therapy: TherapyState::Off,
            active_severity: None,
            silenced: false,
            now,
        }
    }

    fn cfg() -> StatusConfig {
        StatusConfig::default() // late 10s, disconnected 30s
    }

    #[test]
    fn initializing_before_first_reading() {
        // ---
        assert_eq!(
            headline(&cfg(), &base(None, t0())),
            HeadlineStatus::Initializing
        );
    }

    #[test]
    fn freshness_boundaries_are_strict() {
        // ---
        let r = reading_at(t0());

        let at = |secs: i64| headline(&cfg(), &base(Some(&r), t0() + Duration::seconds(secs)));
        assert_eq!(at(10), HeadlineStatus::Normal, "exactly 10s is still fresh");
        assert_eq!(at(11), HeadlineStatus::Late);
        assert_eq!(at(30), HeadlineStatus::Late, "exactly 30s is still late");
        assert_eq!(at(31), HeadlineStatus::Disconnected);
    }

    #[test]
    fn alarm_outranks_silence_and_everything_else() {
        // ---
        let r = reading_at(t0());
        let mut input = base(Some(&r), t0());
        input.active_severity = Some(AlertSeverity::Critical);
        input.silenced = true;
        input.therapy = TherapyState::On;
        assert_eq!(headline(&cfg(), &input), HeadlineStatus::Alarm);
    }

    #[test]
    fn silence_outranks_disconnected() {
        // ---
        let r = reading_at(t0());
        let mut input = base(Some(&r), t0() + Duration::seconds(60));
        input.silenced = true;
        assert_eq!(headline(&cfg(), &input), HeadlineStatus::Silenced);

        input.silenced = false;
        assert_eq!(headline(&cfg(), &input), HeadlineStatus::Disconnected);
    }

    #[test]
    fn therapy_active_outranks_warning() {
        // ---
        let r = reading_at(t0());
        let mut input = base(Some(&r), t0());
        input.therapy = TherapyState::On;
        input.active_severity = Some(AlertSeverity::Warning);
        assert_eq!(headline(&cfg(), &input), HeadlineStatus::TherapyActive);

        input.therapy = TherapyState::Off;
        assert_eq!(headline(&cfg(), &input), HeadlineStatus::Warning);
    }

    #[test]
    fn snapshot_flags_relay_when_disconnected() {
        // ---
        let r = reading_at(t0());
        let input = base(Some(&r), t0() + Duration::seconds(60));
        let snap = StatusSnapshot::build(
            &cfg(),
            &input,
            TherapySample::default(),
            Vec::new(),
            None,
        );
        assert_eq!(snap.headline, HeadlineStatus::Disconnected);
        assert!(snap.needs_relay);

        let fresh = base(Some(&r), t0());
        let snap = StatusSnapshot::build(
            &cfg(),
            &fresh,
            TherapySample::default(),
            Vec::new(),
            None,
        );
        assert!(!snap.needs_relay);
    }
}
