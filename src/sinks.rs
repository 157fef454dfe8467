//! Persistence and alert-delivery seams.
//!
//! Readings are appended to a JSONL file (one JSON object per line, append
//! only) so history survives restarts and stays greppable; alert events go
//! to whatever [`AlertSink`] the runtime is wired with. Sink failures are
//! the caller's problem to log; neither seam may stall the evaluation
//! tick, which is why both carry no retry logic of their own.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::MonitorError;
use crate::models::{AlertEvent, Provenance, Reading, Transition};

// ---

/// Append-only reading persistence.
#[allow(async_fn_in_trait)]
pub trait ReadingSink {
    async fn append(&self, reading: &Reading, provenance: Provenance) -> Result<()>;
}

/// Outbound alert delivery. A `Resolved` event closes the incident opened
/// by the `Fired` event carrying the same id.
#[allow(async_fn_in_trait)]
pub trait AlertSink {
    async fn fire(&self, event: &AlertEvent) -> Result<(), MonitorError>;
    async fn resolve(&self, id: Uuid) -> Result<(), MonitorError>;
}

// ---

#[derive(Serialize)]
struct ReadingRecord<'a> {
    provenance: Provenance,
    #[serde(flatten)]
    reading: &'a Reading,
}

/// JSONL reading log on local disk.
pub struct JsonlReadingSink {
    path: PathBuf,
}

impl JsonlReadingSink {
    pub async fn new(path: impl Into<PathBuf>) -> Result<Self> {
        // ---
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating reading log directory {parent:?}"))?;
            }
        }
        Ok(Self { path })
    }
}

impl ReadingSink for JsonlReadingSink {
    async fn append(&self, reading: &Reading, provenance: Provenance) -> Result<()> {
        // ---
        let mut line = serde_json::to_string(&ReadingRecord {
            provenance,
            reading,
        })
        .context("serializing reading")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening reading log {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .await
            .context("appending reading")?;
        Ok(())
    }
}

// ---

/// Alert sink that records events in the structured log.
///
/// The shipping deployment pairs this with an external notifier; the tick
/// loop only ever sees the trait.
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    async fn fire(&self, event: &AlertEvent) -> Result<(), MonitorError> {
        // ---
        match event.transition {
            Transition::Fired => tracing::error!(
                id = %event.id,
                severity = ?event.severity,
                "ALERT: {}",
                event.message
            ),
            Transition::Resolved => tracing::info!(id = %event.id, "{}", event.message),
        }
        Ok(())
    }

    async fn resolve(&self, id: Uuid) -> Result<(), MonitorError> {
        tracing::info!(%id, "alert incident closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn appends_one_json_line_per_reading() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let sink = JsonlReadingSink::new(&path).await.unwrap();

        let reading = Reading {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            spo2: Some(97),
            heart_rate: 70,
            battery_level: 80,
            movement: 2,
            valid: true,
        };
        sink.append(&reading, Provenance::Link).await.unwrap();
        sink.append(&reading, Provenance::Relay).await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["provenance"], "link");
        assert_eq!(first["spo2"], 97);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["provenance"], "relay");
    }

    #[tokio::test]
    async fn creates_missing_parent_directory() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/readings.jsonl");
        let sink = JsonlReadingSink::new(&path).await.unwrap();

        let reading = Reading {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            spo2: None,
            heart_rate: 0,
            battery_level: 50,
            movement: 0,
            valid: false,
        };
        sink.append(&reading, Provenance::Link).await.unwrap();
        assert!(path.exists());
    }
}
