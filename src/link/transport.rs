//! The BLE transport seam for the link driver.
//!
//! [`LinkTransport`] isolates transport-specific detail behind a small
//! interface: the driver task only ever sends framed commands and receives
//! notification byte chunks. The real binding uses btleplug against the
//! Viatom/Wellue GATT characteristics; `mock::MockTransport` provides the
//! synthetic counterpart.

use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::error::MonitorError;

/// Notification characteristic (device -> host).
pub const RX_CHAR_UUID: Uuid = Uuid::from_u128(0x0734594a_a8e7_4b1a_a6b1_cd5243059a57);

/// Command characteristic (host -> device).
pub const TX_CHAR_UUID: Uuid = Uuid::from_u128(0x8b00ace7_eb0b_49b0_bbe9_9aee0a26e1a3);

// Seconds to let the scanner settle before looking for the device.
const SCAN_SETTLE_SECS: u64 = 3;

// ---

/// Byte-level transport to the oximeter.
#[allow(async_fn_in_trait)]
pub trait LinkTransport {
    /// Write one framed command to the device.
    async fn send(&mut self, frame: &[u8]) -> Result<(), MonitorError>;

    /// Receive the next notification chunk. `None` means the underlying
    /// stream ended (i.e. the link dropped).
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// btleplug-backed transport over the device's GATT characteristics.
pub struct BleTransport {
    peripheral: Peripheral,
    tx_char: Characteristic,
    notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
}

impl BleTransport {
    /// Connect to the oximeter at `mac` and subscribe to notifications.
    ///
    /// One attempt only; reconnection policy belongs to the caller (which
    /// feeds failures into the adapter manager's escalation).
    pub async fn connect(mac: &str) -> Result<Self, MonitorError> {
        // ---
        let link_err = |e: btleplug::Error| MonitorError::LinkDisconnected(e.to_string());

        let manager = Manager::new().await.map_err(link_err)?;
        let central = manager
            .adapters()
            .await
            .map_err(link_err)?
            .into_iter()
            .next()
            .ok_or_else(|| MonitorError::AdapterUnavailable {
                adapter: "no BLE adapter present".into(),
            })?;

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(link_err)?;
        tokio::time::sleep(Duration::from_secs(SCAN_SETTLE_SECS)).await;

        let mut found = None;
        for peripheral in central.peripherals().await.map_err(link_err)? {
            let props = peripheral.properties().await.map_err(link_err)?;
            let matches = props
                .as_ref()
                .map(|p| p.address.to_string().eq_ignore_ascii_case(mac))
                .unwrap_or(false);
            if matches {
                found = Some(peripheral);
                break;
            }
        }
        let _ = central.stop_scan().await;

        let peripheral = found.ok_or_else(|| {
            MonitorError::LinkDisconnected(format!("device {mac} not found in scan"))
        })?;

        peripheral.connect().await.map_err(link_err)?;
        peripheral.discover_services().await.map_err(link_err)?;

        let chars = peripheral.characteristics();
        let rx_char = chars
            .iter()
            .find(|c| c.uuid == RX_CHAR_UUID)
            .cloned()
            .ok_or_else(|| {
                MonitorError::LinkDisconnected("notification characteristic missing".into())
            })?;
        let tx_char = chars
            .iter()
            .find(|c| c.uuid == TX_CHAR_UUID)
            .cloned()
            .ok_or_else(|| {
                MonitorError::LinkDisconnected("command characteristic missing".into())
            })?;

        peripheral.subscribe(&rx_char).await.map_err(link_err)?;
        let notifications = peripheral.notifications().await.map_err(link_err)?;

        tracing::info!(%mac, "BLE link established");
        Ok(Self {
            peripheral,
            tx_char,
            notifications,
        })
    }

    /// Disconnect cleanly. Errors are logged, not propagated: the link may
    /// already be gone.
    pub async fn close(&mut self) {
        // ---
        if let Err(e) = self.peripheral.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed (link already down?)");
        }
    }
}

impl LinkTransport for BleTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), MonitorError> {
        // ---
        self.peripheral
            .write(&self.tx_char, frame, WriteType::WithoutResponse)
            .await
            .map_err(|e| MonitorError::LinkDisconnected(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        // ---
        loop {
            let n = self.notifications.next().await?;
            if n.uuid == RX_CHAR_UUID {
                return Some(n.value);
            }
            // Notifications from other characteristics are not ours to parse.
        }
    }
}
