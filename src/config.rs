//! Configuration for the `pulsewatch` monitoring engine.
//!
//! This module centralizes all runtime configuration values and their
//! defaults. Scalar settings can be overridden from environment variables
//! (with optional `.env` file support provided by the caller); the
//! structured alert-rule table and adapter list load from an optional JSON
//! config file. By consolidating configuration logic here, we avoid
//! scattering `env::var` calls throughout the codebase.

use std::env;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::alerts::rules::{default_rules, Rule, SleepWindow};

/// Parse an optional boolean environment variable ("true"/"1"/"yes").
macro_rules! env_flag {
    ($var_name:expr) => {
        matches!(
            env::var($var_name).ok().as_deref(),
            Some("true") | Some("1") | Some("yes")
        )
    };
}

// ---

/// Oximeter device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// BLE hardware address of the oximeter.
    pub mac_address: String,

    /// Display name, used only in logs.
    pub name: String,

    /// Seconds between reading requests sent over the link.
    pub read_interval_secs: u64,

    /// Minimum gap between emitted readings; near-identical notifications
    /// inside the gap are dropped.
    pub dedup_gap_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mac_address: String::new(),
            name: "Checkme O2 Max".into(),
            read_interval_secs: 10,
            dedup_gap_secs: 1,
        }
    }
}

/// Auxiliary power-meter settings (therapy-device smart plug).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerMeterConfig {
    /// HTTP endpoint of the energy-monitoring plug.
    pub url: String,

    /// Watts above which the therapy device is considered ON.
    pub on_threshold_watts: f64,

    /// Watts below which the therapy device is considered OFF.
    pub off_threshold_watts: f64,

    /// Seconds between polls of the meter.
    pub poll_interval_secs: u64,

    /// Seconds a sampled value is served from cache.
    pub cache_secs: u64,

    /// Hard timeout on each meter request.
    pub request_timeout_secs: u64,
}

impl Default for PowerMeterConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            on_threshold_watts: 3.0,
            off_threshold_watts: 2.0,
            poll_interval_secs: 5,
            cache_secs: 2,
            request_timeout_secs: 5,
        }
    }
}

/// One configured radio adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub name: String,
    pub hardware_address: String,
}

/// Link-failover settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    /// Ordered list of radio adapters to rotate through.
    pub adapters: Vec<AdapterEntry>,

    /// Seconds without a reading before entering switching mode.
    pub switch_timeout_secs: u64,

    /// Seconds to wait on each adapter while switching.
    pub bounce_interval_secs: u64,

    /// Seconds between OS-level adapter presence checks.
    pub health_check_interval_secs: u64,

    /// Seconds of continued connect failures before a radio-stack restart.
    pub restart_after_secs: u64,

    /// Minimum seconds between radio-stack restarts.
    pub restart_cooldown_secs: u64,

    /// Consecutive connect failures before clearing stale link identity.
    pub identity_reset_after_failures: u32,

    /// Seconds a relay-sourced reading suppresses local failover.
    pub relay_fresh_secs: u64,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            adapters: vec![AdapterEntry {
                name: "hci0".into(),
                hardware_address: String::new(),
            }],
            switch_timeout_secs: 300,
            bounce_interval_secs: 60,
            health_check_interval_secs: 60,
            restart_after_secs: 300,
            restart_cooldown_secs: 600,
            identity_reset_after_failures: 3,
            relay_fresh_secs: 60,
        }
    }
}

/// Headline-status staleness thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Seconds without a reading before the headline turns `late`.
    pub late_after_secs: u64,

    /// Seconds without a reading before the headline turns `disconnected`.
    pub disconnected_after_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            late_after_secs: 10,
            disconnected_after_secs: 30,
        }
    }
}

/// Persistence sink settings (the store itself is an external collaborator;
/// the shipping default is a JSON-lines append file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub readings_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            readings_path: "data/readings.jsonl".into(),
        }
    }
}

// ---

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent
/// configuration snapshot for the lifetime of the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run against synthetic hardware instead of real devices.
    pub mock_mode: bool,

    pub device: DeviceConfig,
    pub power_meter: PowerMeterConfig,
    pub adapters: AdaptersConfig,
    pub status: StatusConfig,
    pub storage: StorageConfig,

    /// Local-time window treated as sleep hours (supports midnight wrap).
    pub sleep_window: SleepWindow,

    /// Seconds between evaluation ticks.
    pub tick_interval_secs: u64,

    /// The alert rule table. Defaults cover the full shipped rule set.
    pub rules: Vec<Rule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mock_mode: false,
            device: DeviceConfig::default(),
            power_meter: PowerMeterConfig::default(),
            adapters: AdaptersConfig::default(),
            status: StatusConfig::default(),
            storage: StorageConfig::default(),
            sleep_window: SleepWindow::default(),
            tick_interval_secs: 1,
            rules: default_rules(),
        }
    }
}

/// Load configuration from an optional JSON file plus environment overrides.
///
/// Optional environment variables:
/// - `MOCK_HARDWARE` – force mock mode ("true"/"1"/"yes")
/// - `PULSEWATCH_DEVICE_MAC` – oximeter hardware address
/// - `PULSEWATCH_PLUG_URL` – power-meter endpoint
///
/// Returns an error if the file is unreadable, invalid JSON, or the merged
/// configuration fails validation.
pub fn load(config_path: Option<&Path>) -> Result<Config> {
    // ---
    let mut cfg = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?
        }
        None => Config::default(),
    };

    if env_flag!("MOCK_HARDWARE") {
        cfg.mock_mode = true;
    }
    if let Ok(mac) = env::var("PULSEWATCH_DEVICE_MAC") {
        cfg.device.mac_address = mac;
    }
    if let Ok(url) = env::var("PULSEWATCH_PLUG_URL") {
        cfg.power_meter.url = url;
    }

    validate(&cfg)?;
    Ok(cfg)
}

/// Validate the merged configuration.
fn validate(cfg: &Config) -> Result<()> {
    // ---
    let mut errors = Vec::new();

    if !cfg.mock_mode && cfg.device.mac_address.is_empty() {
        errors.push("device.mac_address is required (or enable mock_mode)".to_string());
    }
    if cfg.power_meter.on_threshold_watts <= cfg.power_meter.off_threshold_watts {
        errors.push("power_meter.on_threshold_watts must be greater than off_threshold_watts".to_string());
    }
    if cfg.adapters.adapters.is_empty() {
        errors.push("adapters.adapters must list at least one radio".to_string());
    }
    if cfg.status.disconnected_after_secs <= cfg.status.late_after_secs {
        errors.push("status.disconnected_after_secs must exceed late_after_secs".to_string());
    }
    if cfg.tick_interval_secs == 0 {
        errors.push("tick_interval_secs must be at least 1".to_string());
    }
    for rule in &cfg.rules {
        if let Err(e) = rule.validate() {
            errors.push(format!("rule {:?}: {e}", rule.alert_type));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("configuration errors:\n  {}", errors.join("\n  ")))
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the power-meter URL query string, which may carry an access
    /// token on some plug firmwares.
    pub fn log_config(&self) {
        // ---
        let masked_plug = match self.power_meter.url.split_once('?') {
            Some((base, _)) => format!("{base}?****"),
            None => self.power_meter.url.clone(),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  mock_mode        : {}", self.mock_mode);
        tracing::info!("  device           : {} ({})", self.device.name, self.device.mac_address);
        tracing::info!("  read interval    : {}s", self.device.read_interval_secs);
        tracing::info!("  power meter      : {}", masked_plug);
        tracing::info!(
            "  therapy band     : on>{:.1}W off<{:.1}W",
            self.power_meter.on_threshold_watts,
            self.power_meter.off_threshold_watts
        );
        tracing::info!(
            "  adapters         : {}",
            self.adapters
                .adapters
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::info!(
            "  failover         : switch {}s, bounce {}s",
            self.adapters.switch_timeout_secs,
            self.adapters.bounce_interval_secs
        );
        tracing::info!("  sleep window     : {}", self.sleep_window);
        tracing::info!("  rules            : {} configured", self.rules.len());
    }
}
