//! Duration-gated alert evaluation.
//!
//! The evaluator is a pure state machine driven by the runtime's 1s tick.
//! Each tick it receives a snapshot of the world ([`EvalInput`]) and emits
//! zero or more [`AlertEvent`]s. A condition must hold continuously for a
//! tier's sustain duration before that tier fires; any tick where the
//! condition is not met discards the tracker, so intermittent blips never
//! alert. Trackers are keyed by (alert type, context) so a therapy-state
//! flip mid-condition restarts the clock under the new thresholds, and each
//! missing radio adapter is tracked independently.
//!
//! Delivery is someone else's job: the evaluator never performs I/O and is
//! only ever touched from the tick task, so it needs no locking.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::models::{AlertEvent, AlertSeverity, AlertType, Reading, TherapyState, Transition};

use super::rules::{Rule, SleepWindow};

// ---

/// Snapshot of everything the evaluator looks at on one tick.
///
/// `now` and `local_time` are passed in rather than read from the clock so
/// tests can drive the tick deterministically; `local_time` exists
/// separately because the sleep window is wall-clock local while everything
/// else is UTC.
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    /// Most recent reading, if any has ever arrived.
    pub reading: Option<&'a Reading>,
    pub therapy: TherapyState,
    /// Whether the link transport currently holds a connection.
    pub link_connected: bool,
    /// Configured adapters the OS no longer reports present.
    pub offline_adapters: &'a [String],
    pub local_time: NaiveTime,
    pub now: DateTime<Utc>,
}

// ---

/// Progress of one (alert type, context) condition.
struct Tracker {
    started_at: DateTime<Utc>,
    /// Per-tier last-fire time, indexed like the rule's tier list.
    last_fired: Vec<Option<DateTime<Utc>>>,
    /// Incident id shared by every fire and the final resolve.
    fired_id: Option<Uuid>,
    highest_fired: Option<AlertSeverity>,
}

/// The alert evaluator. One instance lives on the tick task.
pub struct Evaluator {
    rules: Vec<Rule>,
    sleep_window: SleepWindow,
    trackers: HashMap<(AlertType, String), Tracker>,
}

impl Evaluator {
    pub fn new(rules: Vec<Rule>, sleep_window: SleepWindow) -> Self {
        Self {
            rules,
            sleep_window,
            trackers: HashMap::new(),
        }
    }

    /// Run one evaluation tick, returning the events to deliver.
    pub fn evaluate(&mut self, input: &EvalInput<'_>) -> Vec<AlertEvent> {
        // ---
        let mut events = Vec::new();

        for rule in &self.rules {
            let contexts = active_contexts(rule, input, &self.sleep_window);

            // Conditions no longer met: drop the tracker, closing any open
            // incident.
            let stale: Vec<_> = self
                .trackers
                .keys()
                .filter(|(t, ctx)| *t == rule.alert_type && !contexts.iter().any(|c| c == ctx))
                .cloned()
                .collect();
            for key in stale {
                if let Some(tracker) = self.trackers.remove(&key) {
                    if let Some(id) = tracker.fired_id {
                        events.push(resolved_event(id, rule.alert_type, &key.1, &tracker, input));
                    }
                }
            }

            // Conditions met: advance or start the tracker, firing every
            // tier whose sustain duration has elapsed and whose resend
            // cooldown allows it.
            for ctx in contexts {
                let tiers = rule.spec.tiers();
                let tracker = self
                    .trackers
                    .entry((rule.alert_type, ctx.clone()))
                    .or_insert_with(|| Tracker {
                        started_at: input.now,
                        last_fired: vec![None; tiers.len()],
                        fired_id: None,
                        highest_fired: None,
                    });
                let elapsed = (input.now - tracker.started_at).num_seconds();

                for (i, tier) in tiers.iter().enumerate() {
                    if elapsed < tier.sustain_secs as i64 {
                        // Tiers escalate by duration; later ones cannot be
                        // due either.
                        break;
                    }
                    let due = tracker.last_fired[i].is_none_or(|t| {
                        (input.now - t).num_seconds() >= tier.resend_secs as i64
                    });
                    if !due {
                        continue;
                    }

                    let id = *tracker.fired_id.get_or_insert_with(Uuid::new_v4);
                    tracker.last_fired[i] = Some(input.now);
                    tracker.highest_fired = Some(
                        tracker
                            .highest_fired
                            .map_or(tier.severity, |h| h.max(tier.severity)),
                    );

                    tracing::warn!(
                        alert = rule.alert_type.label(),
                        severity = ?tier.severity,
                        elapsed_secs = elapsed,
                        "alert fired"
                    );
                    events.push(AlertEvent {
                        id,
                        alert_type: rule.alert_type,
                        severity: tier.severity,
                        message: fire_message(rule.alert_type, &ctx, input, elapsed),
                        timestamp: input.now,
                        reading: input.reading.cloned(),
                        therapy: input.therapy,
                        transition: Transition::Fired,
                    });
                }
            }
        }

        events
    }

    /// Highest severity among conditions that have actually fired.
    ///
    /// Used by the status aggregator; conditions still inside their sustain
    /// window do not count.
    pub fn highest_active_severity(&self) -> Option<AlertSeverity> {
        self.trackers.values().filter_map(|t| t.highest_fired).max()
    }
}

// ---

/// The contexts in which `rule`'s condition currently holds. Empty means
/// the condition is not met (or the rule is disabled / inapplicable).
fn active_contexts(rule: &Rule, input: &EvalInput<'_>, sleep: &SleepWindow) -> Vec<String> {
    // ---
    if !rule.enabled {
        return Vec::new();
    }

    match rule.alert_type {
        AlertType::AdapterDisconnect => input.offline_adapters.to_vec(),

        AlertType::Disconnect => {
            let Some(stale_secs) = rule.threshold_for(input.therapy) else {
                return Vec::new();
            };
            let stale = match input.reading {
                None => true,
                Some(r) => r.age_secs(input.now) as f64 > stale_secs,
            };
            if !input.link_connected || stale {
                vec![String::new()]
            } else {
                Vec::new()
            }
        }

        AlertType::NoTherapyDuringSleep => {
            // Unknown counts as "not active": an unreachable power meter
            // must not suppress the nighttime check.
            if sleep.contains(input.local_time) && !input.therapy.is_active() {
                vec![String::new()]
            } else {
                Vec::new()
            }
        }

        AlertType::Spo2Critical
        | AlertType::Spo2Warning
        | AlertType::HeartRateHigh
        | AlertType::HeartRateLow
        | AlertType::BatteryLow => {
            let Some(threshold) = rule.threshold_for(input.therapy) else {
                return Vec::new();
            };
            let Some(reading) = input.reading else {
                return Vec::new();
            };
            if !reading.valid {
                return Vec::new();
            }
            let met = match rule.alert_type {
                AlertType::Spo2Critical | AlertType::Spo2Warning => {
                    reading.spo2.is_some_and(|s| (s as f64) < threshold)
                }
                AlertType::HeartRateHigh => (reading.heart_rate as f64) > threshold,
                AlertType::HeartRateLow => (reading.heart_rate as f64) < threshold,
                AlertType::BatteryLow => (reading.battery_level as f64) < threshold,
                _ => unreachable!(),
            };
            if !met {
                return Vec::new();
            }
            // Thresholds differ per therapy context, so a therapy flip
            // changes the key and restarts the sustain clock. Battery does
            // not depend on therapy.
            if rule.alert_type == AlertType::BatteryLow {
                vec![String::new()]
            } else if input.therapy.is_active() {
                vec!["therapy_on".into()]
            } else {
                vec!["therapy_off".into()]
            }
        }
    }
}

fn fire_message(
    alert_type: AlertType,
    ctx: &str,
    input: &EvalInput<'_>,
    elapsed_secs: i64,
) -> String {
    // ---
    let label = alert_type.label();
    match alert_type {
        AlertType::Spo2Critical | AlertType::Spo2Warning => {
            let spo2 = input
                .reading
                .and_then(|r| r.spo2)
                .map_or_else(|| "?".into(), |s| s.to_string());
            format!("{label}: {spo2}% for {elapsed_secs}s ({ctx})")
        }
        AlertType::HeartRateHigh | AlertType::HeartRateLow => {
            let hr = input.reading.map_or(0, |r| r.heart_rate);
            format!("{label}: {hr} bpm for {elapsed_secs}s")
        }
        AlertType::BatteryLow => {
            let pct = input.reading.map_or(0, |r| r.battery_level);
            format!("{label}: {pct}%")
        }
        AlertType::Disconnect => {
            format!("{label}: no data for {elapsed_secs}s")
        }
        AlertType::NoTherapyDuringSleep => {
            format!("{label}: {} min into sleep hours", elapsed_secs / 60)
        }
        AlertType::AdapterDisconnect => {
            format!("{label}: {ctx} not present")
        }
    }
}

fn resolved_event(
    id: Uuid,
    alert_type: AlertType,
    ctx: &str,
    tracker: &Tracker,
    input: &EvalInput<'_>,
) -> AlertEvent {
    // ---
    tracing::info!(alert = alert_type.label(), "alert resolved");
    let message = if ctx.is_empty() {
        format!("{} resolved", alert_type.label())
    } else {
        format!("{} resolved ({ctx})", alert_type.label())
    };
    AlertEvent {
        id,
        alert_type,
        severity: tracker.highest_fired.unwrap_or(AlertSeverity::Info),
        message,
        timestamp: input.now,
        reading: input.reading.cloned(),
        therapy: input.therapy,
        transition: Transition::Resolved,
    }
}
