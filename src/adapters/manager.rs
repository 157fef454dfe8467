//! The link-failover state machine.
//!
//! The manager owns the configured [`AdapterRecord`] list and which adapter
//! is active. It never performs I/O itself: each entry point returns the
//! [`RecoveryAction`]s the runtime should execute through [`RadioControl`]
//! after releasing the manager lock.
//!
//! Escalation ladder:
//! 1. switching mode rotates through adapters when readings stop;
//! 2. every Nth consecutive connect failure clears stale link identity;
//! 3. failures continuing past `restart_after` trigger a rate-limited
//!    radio-stack restart.

use chrono::{DateTime, Duration, Utc};

use super::bluez::RadioControl;
use crate::config::AdaptersConfig;
use crate::models::{AdapterRecord, AdapterState, LinkHealth};

// ---

/// An OS-level action the runtime must carry out on the manager's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    BringDown(String),
    BringUp(String),
    ResetLinkIdentity(String),
    RestartStack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkMode {
    Normal,
    Switching { last_bounce_at: DateTime<Utc> },
}

/// Tracks adapter health and decides failover/recovery actions.
pub struct AdapterManager {
    cfg: AdaptersConfig,
    target_mac: String,
    adapters: Vec<AdapterRecord>,
    current: usize,
    mode: LinkMode,
    health: LinkHealth,
    last_reading_at: Option<DateTime<Utc>>,
    last_relay_at: Option<DateTime<Utc>>,
    last_health_check: Option<DateTime<Utc>>,
    last_stack_restart: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

impl AdapterManager {
    pub fn new(cfg: AdaptersConfig, target_mac: String, now: DateTime<Utc>) -> Self {
        // ---
        let mut adapters: Vec<AdapterRecord> = cfg
            .adapters
            .iter()
            .map(|a| AdapterRecord::new(&a.name, &a.hardware_address))
            .collect();
        if let Some(first) = adapters.first_mut() {
            first.state = AdapterState::Up;
        }
        Self {
            cfg,
            target_mac,
            adapters,
            current: 0,
            mode: LinkMode::Normal,
            health: LinkHealth::default(),
            last_reading_at: None,
            last_relay_at: None,
            last_health_check: None,
            last_stack_restart: None,
            started_at: now,
        }
    }

    /// Name of the adapter currently pinned for active use.
    pub fn current_adapter(&self) -> &str {
        &self.adapters[self.current].name
    }

    /// Snapshot of per-adapter state for status polling.
    pub fn records(&self) -> Vec<AdapterRecord> {
        self.adapters.clone()
    }

    /// Configured adapters currently missing from the OS.
    pub fn offline_adapters(&self) -> Vec<String> {
        self.adapters
            .iter()
            .filter(|a| a.state == AdapterState::Offline)
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn link_health(&self) -> LinkHealth {
        self.health
    }

    /// Whether the periodic OS presence check is due.
    pub fn health_check_due(&self, now: DateTime<Utc>) -> bool {
        self.last_health_check.is_none_or(|t| {
            now - t >= Duration::seconds(self.cfg.health_check_interval_secs as i64)
        })
    }

    /// Record the result of an OS presence query.
    ///
    /// Adapters not reported by the OS go `Offline` and surface as
    /// per-adapter alert conditions, without affecting the others.
    pub fn observe_present(&mut self, present: &[String], now: DateTime<Utc>) {
        // ---
        self.last_health_check = Some(now);
        for (idx, record) in self.adapters.iter_mut().enumerate() {
            if present.contains(&record.name) {
                record.last_seen = Some(now);
                if record.state == AdapterState::Offline {
                    tracing::info!(adapter = %record.name, "adapter reappeared");
                    record.state = if idx == self.current {
                        AdapterState::Up
                    } else {
                        AdapterState::Down
                    };
                }
            } else if record.state != AdapterState::Offline {
                tracing::warn!(adapter = %record.name, "adapter missing from OS");
                record.state = AdapterState::Offline;
            }
        }
    }

    /// A reading arrived through the link: reset failure counters, pin the
    /// current adapter, and leave switching mode.
    pub fn report_reading(&mut self, now: DateTime<Utc>) {
        // ---
        if let Some(started) = self.health.outage_started_at {
            let outage_secs = (now - started).num_seconds();
            tracing::info!(outage_secs, "link recovered");
        }
        self.health.consecutive_failures = 0;
        self.health.outage_started_at = None;

        if matches!(self.mode, LinkMode::Switching { .. }) {
            tracing::info!(adapter = %self.current_adapter(), "reading received, pinning adapter");
            self.mode = LinkMode::Normal;
        }
        self.adapters[self.current].state = AdapterState::Up;
        self.adapters[self.current].last_seen = Some(now);
        self.last_reading_at = Some(now);
    }

    /// A relay-sourced reading arrived; local failover stays quiet while
    /// relay data is fresh.
    pub fn note_relay(&mut self, now: DateTime<Utc>) {
        self.last_relay_at = Some(now);
    }

    /// Whether a relay-sourced reading arrived recently enough to stand in
    /// for the local link.
    pub fn relay_fresh(&self, now: DateTime<Utc>) -> bool {
        self.last_relay_at
            .is_some_and(|t| now - t < Duration::seconds(self.cfg.relay_fresh_secs as i64))
    }

    /// Periodic failover evaluation. Returns the switching actions due at
    /// `now`, if any.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<RecoveryAction> {
        // ---
        if self.relay_fresh(now) {
            return Vec::new();
        }

        let last_data = self.last_reading_at.unwrap_or(self.started_at);
        match self.mode {
            LinkMode::Normal => {
                let timeout = Duration::seconds(self.cfg.switch_timeout_secs as i64);
                if now - last_data > timeout {
                    tracing::warn!(
                        silent_secs = (now - last_data).num_seconds(),
                        "no readings past switch timeout, entering switching mode"
                    );
                    self.bounce(now)
                } else {
                    Vec::new()
                }
            }
            LinkMode::Switching { last_bounce_at } => {
                let bounce = Duration::seconds(self.cfg.bounce_interval_secs as i64);
                if now - last_bounce_at >= bounce {
                    self.bounce(now)
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Bring the current adapter down and the next one (round-robin,
    /// wrapping, skipping offline radios when possible) up.
    fn bounce(&mut self, now: DateTime<Utc>) -> Vec<RecoveryAction> {
        // ---
        let mut next = (self.current + 1) % self.adapters.len();
        for _ in 0..self.adapters.len() {
            if self.adapters[next].state != AdapterState::Offline {
                break;
            }
            next = (next + 1) % self.adapters.len();
        }

        let mut actions = Vec::new();
        let old = self.current;
        if self.adapters[old].state != AdapterState::Offline {
            self.adapters[old].state = AdapterState::Down;
            actions.push(RecoveryAction::BringDown(self.adapters[old].name.clone()));
        }
        // An OS-missing adapter stays Offline (keeping its alert condition
        // alive); the BringUp still goes out as a retry in case the OS
        // rediscovers it.
        if self.adapters[next].state != AdapterState::Offline {
            self.adapters[next].state = AdapterState::Up;
        }
        actions.push(RecoveryAction::BringUp(self.adapters[next].name.clone()));

        tracing::info!(
            from = %self.adapters[old].name,
            to = %self.adapters[next].name,
            "bouncing link to next adapter"
        );
        self.current = next;
        self.mode = LinkMode::Switching {
            last_bounce_at: now,
        };
        actions
    }

    /// A connect attempt failed. Escalates along the recovery ladder and
    /// returns the actions due now.
    pub fn report_connect_failure(&mut self, now: DateTime<Utc>) -> Vec<RecoveryAction> {
        // ---
        self.health.consecutive_failures += 1;
        let outage_started = *self.health.outage_started_at.get_or_insert(now);

        let mut actions = Vec::new();

        let reset_every = self.cfg.identity_reset_after_failures.max(1);
        if self.health.consecutive_failures % reset_every == 0 {
            actions.push(RecoveryAction::ResetLinkIdentity(self.target_mac.clone()));
            self.health.last_recovery_action_at = Some(now);
        }

        let restart_due =
            now - outage_started >= Duration::seconds(self.cfg.restart_after_secs as i64);
        let cooldown_clear = self.last_stack_restart.is_none_or(|t| {
            now - t >= Duration::seconds(self.cfg.restart_cooldown_secs as i64)
        });
        if restart_due && cooldown_clear {
            actions.push(RecoveryAction::RestartStack);
            self.last_stack_restart = Some(now);
            self.health.last_recovery_action_at = Some(now);
        }

        tracing::warn!(
            consecutive_failures = self.health.consecutive_failures,
            outage_secs = (now - outage_started).num_seconds(),
            actions = actions.len(),
            "connect attempt failed"
        );
        actions
    }
}

// ---

/// Execute manager-decided actions through the radio capability.
///
/// Failures are logged and swallowed: a recovery action that itself fails
/// must not take the evaluation loop down with it.
pub async fn execute_actions<R: RadioControl>(radio: &R, actions: Vec<RecoveryAction>) {
    // ---
    for action in actions {
        let result = match &action {
            RecoveryAction::BringDown(name) => radio.bring_down(name).await,
            RecoveryAction::BringUp(name) => radio.bring_up(name).await,
            RecoveryAction::ResetLinkIdentity(mac) => radio.reset_link_identity(mac).await,
            RecoveryAction::RestartStack => radio.restart_stack().await,
        };
        if let Err(e) = result {
            tracing::error!(?action, error = %e, "recovery action failed");
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::AdapterEntry;
    use chrono::TimeZone;

    fn two_adapter_cfg() -> AdaptersConfig {
        // ---
        AdaptersConfig {
            adapters: vec![
                AdapterEntry {
                    name: "hci0".into(),
                    hardware_address: "AA:AA:AA:AA:AA:00".into(),
                },
                AdapterEntry {
                    name: "hci1".into(),
                    hardware_address: "AA:AA:AA:AA:AA:01".into(),
                },
            ],
            ..AdaptersConfig::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn mgr() -> AdapterManager {
        AdapterManager::new(two_adapter_cfg(), "C8:11:22:33:44:55".into(), t0())
    }

    #[test]
    fn silent_link_switches_then_cycles_back() {
        // ---
        let mut m = mgr();
        m.report_reading(t0());

        // Within the 5-minute window: nothing happens.
        assert!(m.tick(t0() + Duration::seconds(299)).is_empty());

        // 5min + 1s of silence: A goes down, B comes up.
        let actions = m.tick(t0() + Duration::seconds(301));
        assert_eq!(
            actions,
            vec![
                RecoveryAction::BringDown("hci0".into()),
                RecoveryAction::BringUp("hci1".into()),
            ]
        );
        assert_eq!(m.current_adapter(), "hci1");

        // B silent for another minute: cycle back to A, wrapping.
        assert!(m.tick(t0() + Duration::seconds(330)).is_empty());
        let actions = m.tick(t0() + Duration::seconds(361));
        assert_eq!(
            actions,
            vec![
                RecoveryAction::BringDown("hci1".into()),
                RecoveryAction::BringUp("hci0".into()),
            ]
        );
        assert_eq!(m.current_adapter(), "hci0");
    }

    #[test]
    fn reading_exits_switching_and_pins_adapter() {
        // ---
        let mut m = mgr();
        m.report_reading(t0());
        m.tick(t0() + Duration::seconds(301));
        assert_eq!(m.current_adapter(), "hci1");

        m.report_reading(t0() + Duration::seconds(310));

        // Pinned: no bounce due one minute later.
        assert!(m.tick(t0() + Duration::seconds(370)).is_empty());
        assert_eq!(m.current_adapter(), "hci1");
        assert_eq!(m.records()[1].state, AdapterState::Up);
    }

    #[test]
    fn identity_reset_every_third_failure() {
        // ---
        let mut m = mgr();
        assert!(m.report_connect_failure(t0()).is_empty());
        assert!(m.report_connect_failure(t0() + Duration::seconds(10)).is_empty());

        let actions = m.report_connect_failure(t0() + Duration::seconds(20));
        assert_eq!(
            actions,
            vec![RecoveryAction::ResetLinkIdentity("C8:11:22:33:44:55".into())]
        );

        // Streak continues: the sixth failure resets again.
        assert!(m.report_connect_failure(t0() + Duration::seconds(30)).is_empty());
        assert!(m.report_connect_failure(t0() + Duration::seconds(40)).is_empty());
        let actions = m.report_connect_failure(t0() + Duration::seconds(50));
        assert!(actions.contains(&RecoveryAction::ResetLinkIdentity(
            "C8:11:22:33:44:55".into()
        )));
    }

    #[test]
    fn stack_restart_after_five_minutes_rate_limited() {
        // ---
        let mut m = mgr();
        m.report_connect_failure(t0());

        // Still inside the 5-minute window.
        let actions = m.report_connect_failure(t0() + Duration::seconds(299));
        assert!(!actions.contains(&RecoveryAction::RestartStack));

        let actions = m.report_connect_failure(t0() + Duration::seconds(300));
        assert!(actions.contains(&RecoveryAction::RestartStack));

        // Cooldown: no second restart right away.
        let actions = m.report_connect_failure(t0() + Duration::seconds(360));
        assert!(!actions.contains(&RecoveryAction::RestartStack));

        // Past the cooldown window the restart may repeat.
        let actions = m.report_connect_failure(t0() + Duration::seconds(300 + 601));
        assert!(actions.contains(&RecoveryAction::RestartStack));
    }

    #[test]
    fn successful_reading_resets_failure_streak() {
        // ---
        let mut m = mgr();
        m.report_connect_failure(t0());
        m.report_connect_failure(t0() + Duration::seconds(5));
        m.report_reading(t0() + Duration::seconds(10));
        assert_eq!(m.link_health().consecutive_failures, 0);
        assert!(m.link_health().outage_started_at.is_none());

        // Streak restarts from scratch.
        assert!(m.report_connect_failure(t0() + Duration::seconds(20)).is_empty());
    }

    #[test]
    fn missing_adapter_goes_offline_independently() {
        // ---
        let mut m = mgr();
        m.observe_present(&["hci0".into()], t0());
        assert_eq!(m.offline_adapters(), vec!["hci1".to_string()]);
        assert_eq!(m.records()[0].state, AdapterState::Up);

        // Reappearance restores it without touching the active adapter.
        m.observe_present(&["hci0".into(), "hci1".into()], t0() + Duration::seconds(60));
        assert!(m.offline_adapters().is_empty());
        assert_eq!(m.records()[1].state, AdapterState::Down);
    }

    #[test]
    fn switching_skips_offline_adapters() {
        // ---
        let mut m = mgr();
        m.report_reading(t0());
        m.observe_present(&["hci0".into()], t0());

        // Only hci0 is present, so the bounce wraps straight back to it.
        let actions = m.tick(t0() + Duration::seconds(301));
        assert_eq!(
            actions,
            vec![
                RecoveryAction::BringDown("hci0".into()),
                RecoveryAction::BringUp("hci0".into()),
            ]
        );
    }

    #[test]
    fn bounce_with_all_adapters_missing_keeps_them_offline() {
        // ---
        let mut m = mgr();
        m.report_reading(t0());
        m.observe_present(&[], t0());
        assert_eq!(m.offline_adapters().len(), 2);

        // The bounce still retries a BringUp, but an OS-missing adapter
        // must not be promoted to Up: that would clear its alert condition
        // every cycle.
        let actions = m.tick(t0() + Duration::seconds(301));
        assert_eq!(actions, vec![RecoveryAction::BringUp("hci1".into())]);
        assert_eq!(m.offline_adapters().len(), 2);
        assert_eq!(m.records()[1].state, AdapterState::Offline);

        // Once the OS reports it again, the active slot comes back Up.
        m.observe_present(
            &["hci0".into(), "hci1".into()],
            t0() + Duration::seconds(360),
        );
        assert!(m.offline_adapters().is_empty());
        assert_eq!(m.records()[1].state, AdapterState::Up);
    }

    #[test]
    fn fresh_relay_suppresses_switching() {
        // ---
        let mut m = mgr();
        m.report_reading(t0());
        m.note_relay(t0() + Duration::seconds(320));
        assert!(m.tick(t0() + Duration::seconds(330)).is_empty());

        // Once the relay goes stale the normal timeout applies again.
        let actions = m.tick(t0() + Duration::seconds(400));
        assert!(!actions.is_empty());
    }

    #[test]
    fn health_check_gating_honors_interval() {
        // ---
        let mut m = mgr();
        assert!(m.health_check_due(t0()));
        m.observe_present(&["hci0".into(), "hci1".into()], t0());
        assert!(!m.health_check_due(t0() + Duration::seconds(30)));
        assert!(m.health_check_due(t0() + Duration::seconds(60)));
    }
}
