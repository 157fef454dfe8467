//! Caregiver-controlled alert silence.
//!
//! Silencing mutes outbound delivery for a bounded duration; evaluation
//! keeps running underneath so trackers, escalation, and resolution are
//! unaffected. Expiry is purely time-based, so a silence can never outlive
//! its window even across a crash of the delivery path.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

// ---

/// Shared silence window. Cheap to clone behind an `Arc`; the lock is only
/// held for field access, never across I/O.
#[derive(Debug, Default)]
pub struct Silencer {
    until: Mutex<Option<DateTime<Utc>>>,
}

impl Silencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mute delivery until `now + duration`.
    pub fn silence(&self, duration: Duration, now: DateTime<Utc>) {
        // ---
        let until = now + duration;
        tracing::info!(%until, "alerts silenced");
        *self.until.lock().unwrap() = Some(until);
    }

    /// Lift the silence immediately.
    pub fn unsilence(&self) {
        // ---
        if self.until.lock().unwrap().take().is_some() {
            tracing::info!("alert silence lifted");
        }
    }

    pub fn is_silenced(&self, now: DateTime<Utc>) -> bool {
        self.until.lock().unwrap().is_some_and(|until| now < until)
    }

    /// Seconds of silence remaining, if any.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.until
            .lock()
            .unwrap()
            .filter(|until| now < *until)
            .map(|until| (until - now).num_seconds())
    }
}
