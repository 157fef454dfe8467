//! Therapy-aware, duration-gated, escalating alert evaluation.
//!
//! Gateway module (EMBP):
//! - `rules` – the config-driven rule table (simple vs escalating-tiered
//!   variants) and the sleep-hours window
//! - `evaluator` – per-condition duration trackers producing
//!   fired/resolved [`crate::models::AlertEvent`]s each tick
//! - `silence` – the silence-until timestamp shared by the aggregator and
//!   the delivery seam

pub mod evaluator;
pub mod rules;
pub mod silence;

// ---

pub use evaluator::{EvalInput, Evaluator};
pub use rules::{default_rules, Rule, RuleSpec, SleepWindow, Tier};
pub use silence::Silencer;
