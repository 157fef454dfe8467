//! Auxiliary power monitor for the therapy (BiPAP) device.
//!
//! A smart plug with energy metering sits between the wall and the therapy
//! device; its power draw tells us whether the patient is receiving
//! therapy. Classification uses hysteresis so the state does not oscillate
//! at the threshold boundary, a short cache bounds poll frequency, and any
//! meter error degrades to `Unknown` (retried next poll, never fatal).

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::config::PowerMeterConfig;
use crate::error::MonitorError;
use crate::models::{TherapySample, TherapyState};

// ---

/// Source of instantaneous power readings. The network detail of any given
/// plug firmware stays behind this seam.
#[allow(async_fn_in_trait)]
pub trait PowerMeter {
    async fn read_watts(&self) -> Result<f64, MonitorError>;
}

/// Therapy-state classifier over a [`PowerMeter`].
pub struct TherapyMonitor<M: PowerMeter> {
    meter: M,
    on_threshold: f64,
    off_threshold: f64,
    cache_for: Duration,
    state: TherapyState,
    last_sample: Option<TherapySample>,
}

impl<M: PowerMeter> TherapyMonitor<M> {
    pub fn new(cfg: &PowerMeterConfig, meter: M) -> Self {
        Self {
            meter,
            on_threshold: cfg.on_threshold_watts,
            off_threshold: cfg.off_threshold_watts,
            cache_for: Duration::seconds(cfg.cache_secs as i64),
            state: TherapyState::Unknown,
            last_sample: None,
        }
    }

    /// Classify the current therapy state, serving a recent sample from
    /// cache to bound poll frequency.
    pub async fn sample(&mut self, now: DateTime<Utc>) -> TherapySample {
        // ---
        if let Some(cached) = self.last_sample {
            if cached.state != TherapyState::Unknown && now - cached.sampled_at < self.cache_for {
                return cached;
            }
        }
        self.refresh(now).await
    }

    /// Force a meter read, bypassing the cache.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> TherapySample {
        // ---
        let sample = match self.meter.read_watts().await {
            Ok(watts) => {
                self.state = self.classify(watts);
                TherapySample {
                    state: self.state,
                    last_power_watts: Some(watts),
                    sampled_at: now,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "power meter unreachable, therapy state unknown");
                self.state = TherapyState::Unknown;
                TherapySample {
                    state: TherapyState::Unknown,
                    last_power_watts: None,
                    sampled_at: now,
                }
            }
        };
        self.last_sample = Some(sample);
        sample
    }

    /// ON above `on_threshold`, OFF below `off_threshold`; inside the
    /// hysteresis band the previous state is retained.
    fn classify(&self, watts: f64) -> TherapyState {
        // ---
        if watts > self.on_threshold {
            TherapyState::On
        } else if watts < self.off_threshold {
            TherapyState::Off
        } else {
            self.state
        }
    }
}

// ---

/// HTTP energy-meter client (Tasmota-style `StatusSNS` JSON endpoint).
///
/// The plug's network I/O is an external collaborator's concern; this
/// client exists so the shipping binary has a real meter, and every request
/// carries a hard timeout so a wedged plug can never stall the tick loop.
pub struct HttpPowerMeter {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct MeterStatus {
    #[serde(rename = "StatusSNS")]
    status_sns: MeterSns,
}

#[derive(Deserialize)]
struct MeterSns {
    #[serde(rename = "ENERGY")]
    energy: MeterEnergy,
}

#[derive(Deserialize)]
struct MeterEnergy {
    #[serde(rename = "Power")]
    power: f64,
}

impl HttpPowerMeter {
    pub fn new(cfg: &PowerMeterConfig) -> Result<Self, MonitorError> {
        // ---
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| MonitorError::AuxiliaryDeviceUnreachable(e.to_string()))?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
        })
    }
}

impl PowerMeter for HttpPowerMeter {
    async fn read_watts(&self) -> Result<f64, MonitorError> {
        // ---
        let unreachable = |e: String| MonitorError::AuxiliaryDeviceUnreachable(e);

        let status: MeterStatus = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unreachable(e.to_string()))?
            .json()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        Ok(status.status_sns.energy.power)
    }
}

/// Deterministic meter for mock mode: therapy "switches on" at night.
pub struct MockPowerMeter;

impl PowerMeter for MockPowerMeter {
    async fn read_watts(&self) -> Result<f64, MonitorError> {
        // ---
        use chrono::Timelike;
        let hour = chrono::Local::now().hour();
        Ok(if (22..24).contains(&hour) || hour < 7 {
            11.5
        } else {
            0.4
        })
    }
}
