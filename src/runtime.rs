//! Task wiring for the monitoring engine.
//!
//! One task owns the link transport and does nothing but pump frames; the
//! evaluator and aggregator run on a fixed tick; the power meter and the
//! adapter health check poll on their own intervals. Tasks exchange
//! immutable snapshots over watch channels, and the adapter manager's lock
//! is only ever held to make a decision, never across I/O.
//!
//! [`MonitorHandle`] is the surface handed to collaborators: relay
//! ingestion, status polling, silence control, shutdown.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::adapters::{execute_actions, AdapterManager, BlueZRadio, RadioControl};
use crate::alerts::{EvalInput, Evaluator, Silencer};
use crate::config::Config;
use crate::error::MonitorError;
use crate::link::{BleTransport, LinkDriver, LinkTransport, MockTransport};
use crate::models::{Provenance, Reading, TherapySample, Transition};
use crate::sinks::{AlertSink, JsonlReadingSink, LogAlertSink, ReadingSink};
use crate::status::{StatusInputs, StatusSnapshot};
use crate::therapy::{HttpPowerMeter, MockPowerMeter, PowerMeter, TherapyMonitor};

// Grace period for task teardown on shutdown.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

// Relay ingest queue depth; the phone submits at reading cadence, so this
// only absorbs short bursts.
const RELAY_QUEUE: usize = 32;

// ---

/// State shared between the monitor's tasks.
struct Shared {
    cfg: Config,
    manager: Mutex<AdapterManager>,
    silencer: Silencer,
    reading_tx: watch::Sender<Option<Reading>>,
    link_up_tx: watch::Sender<bool>,
    therapy_tx: watch::Sender<TherapySample>,
    status_tx: watch::Sender<Option<StatusSnapshot>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Shared {
    fn shutting_down(&self) -> bool {
        *self.shutdown_tx.subscribe().borrow()
    }
}

/// Cloneable surface handed to external collaborators (phone relay,
/// dashboard, caregiver controls).
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
    relay: mpsc::Sender<Reading>,
    status: watch::Receiver<Option<StatusSnapshot>>,
}

impl MonitorHandle {
    /// Submit a relay-sourced reading. It flows through the identical
    /// evaluation and persistence path as link readings and suppresses
    /// local failover while fresh.
    pub async fn submit_relay_reading(&self, reading: Reading) -> Result<()> {
        self.relay
            .send(reading)
            .await
            .map_err(|_| anyhow::anyhow!("monitor is not running"))
    }

    /// Latest status snapshot, `None` until the first evaluation tick.
    pub fn latest_status(&self) -> Option<StatusSnapshot> {
        self.status.borrow().clone()
    }

    /// Wait until a status snapshot newer than the last observed one is
    /// published.
    pub async fn status_changed(&mut self) -> Result<()> {
        self.status
            .changed()
            .await
            .map_err(|_| anyhow::anyhow!("monitor is not running"))
    }

    pub fn silence(&self, duration: chrono::Duration) {
        self.shared.silencer.silence(duration, Utc::now());
    }

    pub fn unsilence(&self) {
        self.shared.silencer.unsilence();
    }

    /// Request an orderly shutdown of all monitor tasks.
    pub fn shutdown(&self) {
        self.shared.shutdown_tx.send_replace(true);
    }
}

// ---

/// The assembled monitoring engine.
pub struct Monitor {
    shared: Arc<Shared>,
    relay_tx: mpsc::Sender<Reading>,
    relay_rx: mpsc::Receiver<Reading>,
}

impl Monitor {
    pub fn new(cfg: Config) -> Self {
        // ---
        let manager = AdapterManager::new(
            cfg.adapters.clone(),
            cfg.device.mac_address.clone(),
            Utc::now(),
        );
        let (relay_tx, relay_rx) = mpsc::channel(RELAY_QUEUE);
        let shared = Arc::new(Shared {
            cfg,
            manager: Mutex::new(manager),
            silencer: Silencer::new(),
            reading_tx: watch::channel(None).0,
            link_up_tx: watch::channel(false).0,
            therapy_tx: watch::channel(TherapySample::default()).0,
            status_tx: watch::channel(None).0,
            shutdown_tx: watch::channel(false).0,
        });
        Self {
            shared,
            relay_tx,
            relay_rx,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            shared: self.shared.clone(),
            relay: self.relay_tx.clone(),
            status: self.shared.status_tx.subscribe(),
        }
    }

    /// Run all tasks until Ctrl-C or [`MonitorHandle::shutdown`], then tear
    /// down within a bounded grace period. Pending alert trackers are
    /// deliberately not drained: conditions reset on restart.
    pub async fn run(self) -> Result<()> {
        // ---
        let shared = self.shared;
        let sink = Arc::new(JsonlReadingSink::new(&shared.cfg.storage.readings_path).await?);

        let mut tasks = Vec::new();
        if shared.cfg.mock_mode {
            tracing::info!("mock mode: synthetic link and power meter");
            tasks.push(tokio::spawn(pump_mock(shared.clone(), sink.clone())));
            tasks.push(tokio::spawn(run_therapy(shared.clone(), MockPowerMeter)));
        } else {
            let meter = HttpPowerMeter::new(&shared.cfg.power_meter)
                .map_err(|e| anyhow::anyhow!("power meter client: {e}"))?;
            tasks.push(tokio::spawn(pump_ble(shared.clone(), sink.clone())));
            tasks.push(tokio::spawn(run_therapy(shared.clone(), meter)));
            tasks.push(tokio::spawn(run_adapters(shared.clone(), BlueZRadio)));
        }
        tasks.push(tokio::spawn(run_relay(
            shared.clone(),
            self.relay_rx,
            sink.clone(),
        )));
        tasks.push(tokio::spawn(run_eval(shared.clone(), LogAlertSink)));

        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
            }
            _ = shutdown_rx.changed() => {}
        }
        shared.shutdown_tx.send_replace(true);

        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("task did not stop within grace period");
            }
        }
        tracing::info!("monitor stopped");
        Ok(())
    }
}

// ---

/// Pump one connected transport until shutdown or stream loss.
async fn pump<T: LinkTransport>(
    shared: &Shared,
    sink: &JsonlReadingSink,
    transport: &mut T,
) -> Result<(), MonitorError> {
    // ---
    let mut driver = LinkDriver::new(shared.cfg.device.dedup_gap_secs);
    let mut shutdown = shared.shutdown_tx.subscribe();
    let interval = std::time::Duration::from_secs(shared.cfg.device.read_interval_secs.max(1));
    let mut next_request = tokio::time::Instant::now();

    loop {
        // The request is sent outside the select so the transport is not
        // mutably borrowed by two branches at once.
        let mut request_due = false;
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            _ = tokio::time::sleep_until(next_request) => request_due = true,
            chunk = transport.recv() => {
                let Some(bytes) = chunk else {
                    return Err(MonitorError::LinkDisconnected(
                        "notification stream ended".into(),
                    ));
                };
                let now = Utc::now();
                for reading in driver.on_notification(&bytes, now) {
                    shared.manager.lock().unwrap().report_reading(now);
                    if let Err(e) = sink.append(&reading, Provenance::Link).await {
                        tracing::warn!(error = %e, "failed to persist reading");
                    }
                    tracing::debug!(
                        spo2 = ?reading.spo2,
                        hr = reading.heart_rate,
                        valid = reading.valid,
                        "reading"
                    );
                    shared.reading_tx.send_replace(Some(reading));
                }
            }
        }
        if request_due {
            next_request = tokio::time::Instant::now() + interval;
            transport.send(&LinkDriver::reading_request()).await?;
        }
    }
}

/// BLE link task: connect, pump, escalate failures, repeat.
async fn pump_ble(shared: Arc<Shared>, sink: Arc<JsonlReadingSink>) {
    // ---
    let radio = BlueZRadio;
    let mut shutdown = shared.shutdown_tx.subscribe();
    let retry = std::time::Duration::from_secs(shared.cfg.device.read_interval_secs);

    while !shared.shutting_down() {
        // Fresh relay data stands in for the local link; do not churn the
        // radio while it lasts.
        if shared.manager.lock().unwrap().relay_fresh(Utc::now()) {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(retry) => continue,
            }
        }

        match BleTransport::connect(&shared.cfg.device.mac_address).await {
            Ok(mut transport) => {
                tracing::info!(device = %shared.cfg.device.name, "link established");
                shared.link_up_tx.send_replace(true);
                let result = pump(&shared, &sink, &mut transport).await;
                shared.link_up_tx.send_replace(false);
                transport.close().await;
                match result {
                    Ok(()) => break,
                    Err(e) => tracing::warn!(error = %e, "link lost"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect attempt failed");
                let actions = shared
                    .manager
                    .lock()
                    .unwrap()
                    .report_connect_failure(Utc::now());
                execute_actions(&radio, actions).await;
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

/// Synthetic link task for mock mode.
async fn pump_mock(shared: Arc<Shared>, sink: Arc<JsonlReadingSink>) {
    // ---
    let mut transport = MockTransport::new();
    shared.link_up_tx.send_replace(true);
    if let Err(e) = pump(&shared, &sink, &mut transport).await {
        tracing::error!(error = %e, "mock link stopped");
    }
    shared.link_up_tx.send_replace(false);
}

/// Poll the power meter and publish therapy samples.
async fn run_therapy<M: PowerMeter>(shared: Arc<Shared>, meter: M) {
    // ---
    let mut monitor = TherapyMonitor::new(&shared.cfg.power_meter, meter);
    let mut shutdown = shared.shutdown_tx.subscribe();
    let mut poll = tokio::time::interval(std::time::Duration::from_secs(
        shared.cfg.power_meter.poll_interval_secs,
    ));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = poll.tick() => {
                let sample = monitor.sample(Utc::now()).await;
                shared.therapy_tx.send_replace(sample);
            }
        }
    }
}

/// Adapter supervision: OS presence checks and failover switching. The
/// manager decides under its lock; actions execute after release.
async fn run_adapters(shared: Arc<Shared>, radio: BlueZRadio) {
    // ---
    let mut shutdown = shared.shutdown_tx.subscribe();
    let mut poll = tokio::time::interval(std::time::Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = poll.tick() => {
                let now = Utc::now();

                if shared.manager.lock().unwrap().health_check_due(now) {
                    match radio.list_present().await {
                        Ok(present) => {
                            shared.manager.lock().unwrap().observe_present(&present, now);
                        }
                        Err(e) => tracing::warn!(error = %e, "adapter presence check failed"),
                    }
                }

                let actions = shared.manager.lock().unwrap().tick(now);
                execute_actions(&radio, actions).await;
            }
        }
    }
}

/// Drain relay-submitted readings into the common pipeline.
async fn run_relay(
    shared: Arc<Shared>,
    mut relay_rx: mpsc::Receiver<Reading>,
    sink: Arc<JsonlReadingSink>,
) {
    // ---
    let mut shutdown = shared.shutdown_tx.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            reading = relay_rx.recv() => {
                let Some(reading) = reading else { break };
                let now = Utc::now();
                shared.manager.lock().unwrap().note_relay(now);
                if let Err(e) = sink.append(&reading, Provenance::Relay).await {
                    tracing::warn!(error = %e, "failed to persist relay reading");
                }
                tracing::debug!(spo2 = ?reading.spo2, "relay reading");
                shared.reading_tx.send_replace(Some(reading));
            }
        }
    }
}

/// The evaluation tick: run the alert rules and publish the status
/// snapshot.
async fn run_eval<S: AlertSink>(shared: Arc<Shared>, alert_sink: S) {
    // ---
    let mut evaluator = Evaluator::new(shared.cfg.rules.clone(), shared.cfg.sleep_window);
    let mut shutdown = shared.shutdown_tx.subscribe();
    let reading_rx = shared.reading_tx.subscribe();
    let therapy_rx = shared.therapy_tx.subscribe();
    let link_rx = shared.link_up_tx.subscribe();
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(
        shared.cfg.tick_interval_secs,
    ));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let now = Utc::now();
                let reading = reading_rx.borrow().clone();
                let therapy = *therapy_rx.borrow();
                let link_connected = *link_rx.borrow();
                let (offline, records) = {
                    let manager = shared.manager.lock().unwrap();
                    (manager.offline_adapters(), manager.records())
                };

                let input = EvalInput {
                    reading: reading.as_ref(),
                    therapy: therapy.state,
                    link_connected,
                    offline_adapters: &offline,
                    local_time: chrono::Local::now().time(),
                    now,
                };
                let events = evaluator.evaluate(&input);

                let silenced = shared.silencer.is_silenced(now);
                for event in events {
                    // A silence mutes local delivery, but critical alerts
                    // still go out so they can escalate remotely.
                    if silenced
                        && event.transition == Transition::Fired
                        && event.severity < crate::models::AlertSeverity::Critical
                    {
                        tracing::debug!(alert = event.alert_type.label(), "delivery silenced");
                        continue;
                    }
                    let delivered = match event.transition {
                        Transition::Fired => alert_sink.fire(&event).await,
                        Transition::Resolved => alert_sink.resolve(event.id).await,
                    };
                    if let Err(e) = delivered {
                        tracing::error!(error = %e, "alert delivery failed");
                    }
                }

                let inputs = StatusInputs {
                    last_reading: reading.as_ref(),
                    therapy: therapy.state,
                    active_severity: evaluator.highest_active_severity(),
                    silenced,
                    now,
                };
                let snapshot = StatusSnapshot::build(
                    &shared.cfg.status,
                    &inputs,
                    therapy,
                    records,
                    shared.silencer.remaining_secs(now),
                );
                shared.status_tx.send_replace(Some(snapshot));
            }
        }
    }
}
