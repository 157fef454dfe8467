//! OS Bluetooth-stack control behind a narrow capability interface.
//!
//! The "clear stale identity" action targets a known class of bug where the
//! OS still believes a dropped link is active and filters out the device's
//! advertisements; removing the cached device forces rediscovery. The full
//! stack restart is the last escalation tier and is rate-limited by the
//! adapter manager, not here.

use std::time::Duration;

use tokio::process::Command;

use crate::error::MonitorError;

// Bound on any single OS-level control call.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

// ---

/// Capability interface over the platform Bluetooth stack.
///
/// The adapter manager's algorithm is portable across bindings; only this
/// trait knows about hciconfig/bluetoothctl/systemd.
#[allow(async_fn_in_trait)]
pub trait RadioControl {
    /// Names of adapters the OS currently knows about.
    async fn list_present(&self) -> Result<Vec<String>, MonitorError>;

    /// Power an adapter on.
    async fn bring_up(&self, adapter: &str) -> Result<(), MonitorError>;

    /// Power an adapter off.
    async fn bring_down(&self, adapter: &str) -> Result<(), MonitorError>;

    /// Remove and rediscover the target device at the stack level.
    async fn reset_link_identity(&self, device_mac: &str) -> Result<(), MonitorError>;

    /// Restart the whole radio stack.
    async fn restart_stack(&self) -> Result<(), MonitorError>;
}

// ---

/// BlueZ implementation used on the deployment target.
#[derive(Debug, Default, Clone)]
pub struct BlueZRadio;

impl BlueZRadio {
    async fn run(&self, what: &str, program: &str, args: &[&str]) -> Result<(), MonitorError> {
        // ---
        let unavailable = |detail: String| MonitorError::AdapterUnavailable {
            adapter: format!("{what}: {detail}"),
        };

        let output = tokio::time::timeout(
            CONTROL_TIMEOUT,
            Command::new(program).args(args).output(),
        )
        .await
        .map_err(|_| unavailable("timed out".into()))?
        .map_err(|e| unavailable(e.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(unavailable(stderr))
        }
    }
}

impl RadioControl for BlueZRadio {
    async fn list_present(&self) -> Result<Vec<String>, MonitorError> {
        // ---
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir("/sys/class/bluetooth")
            .await
            .map_err(|e| MonitorError::AdapterUnavailable {
                adapter: format!("sysfs: {e}"),
            })?;
        while let Ok(Some(entry)) = dir.next_entry().await.map_err(|e| {
            MonitorError::AdapterUnavailable {
                adapter: format!("sysfs: {e}"),
            }
        }) {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Controllers only; "hci0:11" style connection entries are not
            // adapters.
            if !name.contains(':') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn bring_up(&self, adapter: &str) -> Result<(), MonitorError> {
        // ---
        tracing::info!(%adapter, "bringing adapter up");
        self.run(adapter, "hciconfig", &[adapter, "up"]).await
    }

    async fn bring_down(&self, adapter: &str) -> Result<(), MonitorError> {
        // ---
        tracing::info!(%adapter, "bringing adapter down");
        self.run(adapter, "hciconfig", &[adapter, "down"]).await
    }

    async fn reset_link_identity(&self, device_mac: &str) -> Result<(), MonitorError> {
        // ---
        tracing::warn!(%device_mac, "clearing stale link identity");
        self.run("bluetoothctl", "bluetoothctl", &["remove", device_mac])
            .await
    }

    async fn restart_stack(&self) -> Result<(), MonitorError> {
        // ---
        tracing::warn!("restarting Bluetooth stack");
        self.run("bluetooth.service", "systemctl", &["restart", "bluetooth"])
            .await
    }
}
