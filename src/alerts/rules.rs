//! The alert rule table.
//!
//! Rules are data, not code paths: each alert type is one table entry with
//! per-therapy-context thresholds and either a single tier (simple rules)
//! or an ordered ladder of tiers (escalating rules). New rule shapes are
//! new table entries, not new branches in the evaluator.

use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::models::{AlertSeverity, AlertType, TherapyState};

// ---

/// One (sustain-duration, severity, resend-interval) step of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Seconds the condition must hold continuously before firing.
    pub sustain_secs: u64,
    pub severity: AlertSeverity,
    /// Minimum seconds between repeat fires of this tier.
    pub resend_secs: u64,
}

/// Simple rules have one tier; escalating rules have ordered tiers of
/// increasing duration and severity with independent cooldowns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSpec {
    Simple { tier: Tier },
    Escalating { tiers: Vec<Tier> },
}

impl RuleSpec {
    pub fn tiers(&self) -> &[Tier] {
        match self {
            RuleSpec::Simple { tier } => std::slice::from_ref(tier),
            RuleSpec::Escalating { tiers } => tiers,
        }
    }
}

/// One configured alert rule.
///
/// `threshold_therapy_off` applies when therapy is off or unknown;
/// `threshold_therapy_on` when it is on. `None` disables the rule in that
/// context. Threshold semantics are strict inequalities against the raw
/// reading value; for the disconnect rule the threshold is the staleness
/// cutoff in seconds, and the sleep/adapter rules ignore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub alert_type: AlertType,
    pub enabled: bool,
    pub threshold_therapy_off: Option<f64>,
    pub threshold_therapy_on: Option<f64>,
    pub spec: RuleSpec,
}

impl Rule {
    /// The threshold selected by the current therapy context, or `None`
    /// when the rule does not apply in that context.
    pub fn threshold_for(&self, therapy: TherapyState) -> Option<f64> {
        if therapy.is_active() {
            self.threshold_therapy_on
        } else {
            self.threshold_therapy_off
        }
    }

    /// Tiers must exist and escalate by strictly increasing duration.
    pub fn validate(&self) -> Result<(), String> {
        // ---
        let tiers = self.spec.tiers();
        if tiers.is_empty() {
            return Err("rule has no tiers".into());
        }
        for pair in tiers.windows(2) {
            if pair[1].sustain_secs <= pair[0].sustain_secs {
                return Err("escalating tiers must have strictly increasing durations".into());
            }
        }
        Ok(())
    }
}

// ---

/// Local-time window treated as sleep hours; supports windows crossing
/// midnight. The start bound is inclusive, the end bound exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SleepWindowRepr", into = "SleepWindowRepr")]
pub struct SleepWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Serialize, Deserialize)]
struct SleepWindowRepr {
    start: String,
    end: String,
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| format!("invalid time {s:?}: {e}"))
}

impl TryFrom<SleepWindowRepr> for SleepWindow {
    type Error = String;

    fn try_from(repr: SleepWindowRepr) -> Result<Self, Self::Error> {
        Ok(Self {
            start: parse_hhmm(&repr.start)?,
            end: parse_hhmm(&repr.end)?,
        })
    }
}

impl From<SleepWindow> for SleepWindowRepr {
    fn from(w: SleepWindow) -> Self {
        Self {
            start: w.start.format("%H:%M").to_string(),
            end: w.end.format("%H:%M").to_string(),
        }
    }
}

impl Default for SleepWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        }
    }
}

impl fmt::Display for SleepWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

impl SleepWindow {
    /// Whether `t` falls inside the window, with midnight wraparound when
    /// `start > end`. A degenerate window with `start == end` never
    /// matches.
    pub fn contains(&self, t: NaiveTime) -> bool {
        // ---
        if self.start < self.end {
            t >= self.start && t < self.end
        } else if self.start > self.end {
            t >= self.start || t < self.end
        } else {
            false
        }
    }
}

// ---

fn simple(
    alert_type: AlertType,
    off: Option<f64>,
    on: Option<f64>,
    tier: Tier,
) -> Rule {
    Rule {
        alert_type,
        enabled: true,
        threshold_therapy_off: off,
        threshold_therapy_on: on,
        spec: RuleSpec::Simple { tier },
    }
}

/// The shipped rule set, matching the deployment defaults.
pub fn default_rules() -> Vec<Rule> {
    // ---
    vec![
        // SpO2 below 90% off therapy is the headline life-safety alarm;
        // on therapy the machine's own alarms lead, so the local bar drops.
        simple(
            AlertType::Spo2Critical,
            Some(90.0),
            Some(85.0),
            Tier {
                sustain_secs: 30,
                severity: AlertSeverity::Critical,
                resend_secs: 300,
            },
        ),
        simple(
            AlertType::Spo2Warning,
            Some(92.0),
            None,
            Tier {
                sustain_secs: 60,
                severity: AlertSeverity::Warning,
                resend_secs: 600,
            },
        ),
        simple(
            AlertType::HeartRateHigh,
            Some(130.0),
            Some(130.0),
            Tier {
                sustain_secs: 60,
                severity: AlertSeverity::Warning,
                resend_secs: 600,
            },
        ),
        simple(
            AlertType::HeartRateLow,
            Some(40.0),
            Some(40.0),
            Tier {
                sustain_secs: 60,
                severity: AlertSeverity::High,
                resend_secs: 600,
            },
        ),
        simple(
            AlertType::BatteryLow,
            Some(20.0),
            Some(20.0),
            Tier {
                sustain_secs: 60,
                severity: AlertSeverity::Warning,
                resend_secs: 3600,
            },
        ),
        // Threshold here is the reading-staleness cutoff in seconds.
        Rule {
            alert_type: AlertType::Disconnect,
            enabled: true,
            threshold_therapy_off: Some(30.0),
            threshold_therapy_on: Some(30.0),
            spec: RuleSpec::Escalating {
                tiers: vec![
                    Tier {
                        sustain_secs: 180,
                        severity: AlertSeverity::Warning,
                        resend_secs: 1800,
                    },
                    Tier {
                        sustain_secs: 7200,
                        severity: AlertSeverity::High,
                        resend_secs: 3600,
                    },
                    Tier {
                        sustain_secs: 10800,
                        severity: AlertSeverity::Critical,
                        resend_secs: 3600,
                    },
                ],
            },
        },
        Rule {
            alert_type: AlertType::NoTherapyDuringSleep,
            enabled: true,
            threshold_therapy_off: Some(0.0),
            threshold_therapy_on: Some(0.0),
            spec: RuleSpec::Escalating {
                tiers: vec![
                    Tier {
                        sustain_secs: 1800,
                        severity: AlertSeverity::Warning,
                        resend_secs: 3600,
                    },
                    Tier {
                        sustain_secs: 7200,
                        severity: AlertSeverity::High,
                        resend_secs: 3600,
                    },
                ],
            },
        },
        simple(
            AlertType::AdapterDisconnect,
            Some(0.0),
            Some(0.0),
            Tier {
                sustain_secs: 60,
                severity: AlertSeverity::Warning,
                resend_secs: 1800,
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn sleep_window_wraps_midnight() {
        // ---
        let w = SleepWindow::default(); // 22:00-07:00
        assert!(w.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(w.contains(NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(21, 59, 0).unwrap()));
    }

    #[test]
    fn sleep_window_without_wrap() {
        // ---
        let w = SleepWindow {
            start: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
        };
        assert!(w.contains(NaiveTime::from_hms_opt(13, 0, 0).unwrap()));
        assert!(w.contains(NaiveTime::from_hms_opt(14, 59, 59).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(15, 0, 0).unwrap()));
        assert!(!w.contains(NaiveTime::from_hms_opt(12, 59, 59).unwrap()));
    }

    #[test]
    fn sleep_window_parses_hhmm_strings() {
        // ---
        let w: SleepWindow =
            serde_json::from_str(r#"{"start":"22:00","end":"07:00"}"#).unwrap();
        assert_eq!(w, SleepWindow::default());
        assert!(serde_json::from_str::<SleepWindow>(r#"{"start":"25:99","end":"07:00"}"#).is_err());
    }

    #[test]
    fn default_rules_all_validate() {
        // ---
        for rule in default_rules() {
            rule.validate().unwrap();
        }
    }

    #[test]
    fn unordered_escalating_tiers_rejected() {
        // ---
        let rule = Rule {
            alert_type: AlertType::Disconnect,
            enabled: true,
            threshold_therapy_off: Some(30.0),
            threshold_therapy_on: Some(30.0),
            spec: RuleSpec::Escalating {
                tiers: vec![
                    Tier {
                        sustain_secs: 600,
                        severity: AlertSeverity::Warning,
                        resend_secs: 60,
                    },
                    Tier {
                        sustain_secs: 600,
                        severity: AlertSeverity::High,
                        resend_secs: 60,
                    },
                ],
            },
        };
        assert!(rule.validate().is_err());
    }

    #[test]
    fn unknown_therapy_uses_off_threshold() {
        // ---
        let rules = default_rules();
        let spo2 = rules
            .iter()
            .find(|r| r.alert_type == AlertType::Spo2Critical)
            .unwrap();
        assert_eq!(spo2.threshold_for(TherapyState::Unknown), Some(90.0));
        assert_eq!(spo2.threshold_for(TherapyState::On), Some(85.0));
    }
}
