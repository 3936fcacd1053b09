use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::connection::Transport;
use crate::events::AnovaEvent;
use crate::{Anova, Config, Error};

// Bluetooth-only cookers expose a single serial-style characteristic used
// for both command writes and response notifications
const ANOVA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);
const ANOVA_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// A device seen during a BLE scan
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Platform address (MAC on Linux/Windows, UUID on macOS)
    pub address: String,
    peripheral: Peripheral,
}

/// Writes commands to the cooker's characteristic
struct BleTransport {
    peripheral: Peripheral,
    characteristic: Characteristic,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for BleTransport {
    async fn write(&self, data: &[u8]) -> crate::Result<()> {
        tracing::debug!("BLE TX: {} bytes: {:02x?}", data.len(), data);
        self.peripheral
            .write(&self.characteristic, data, WriteType::WithResponse)
            .await
            .map_err(|e| Error::transport(format!("BLE write failed: {}", e)))
    }

    async fn disconnect(&self) -> crate::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| Error::connection(format!("Failed to disconnect: {}", e)))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn first_adapter() -> crate::Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|e| Error::connection(format!("Failed to create BLE manager: {}", e)))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| Error::connection(format!("Failed to get BLE adapters: {}", e)))?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::connection("No BLE adapters found"))
}

/// One scan pass: scan for `timeout`, then list what the adapter saw
async fn scan_once(adapter: &Adapter, timeout: Duration) -> crate::Result<Vec<DiscoveredDevice>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(timeout).await;
    let _ = adapter.stop_scan().await;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await {
            tracing::debug!("Found device: {} {:?}", props.address, props.local_name);
            devices.push(DiscoveredDevice {
                name: props.local_name,
                address: props.address.to_string(),
                peripheral,
            });
        }
    }
    Ok(devices)
}

impl Anova {
    /// Scan for nearby BLE devices.
    ///
    /// Only devices whose address matches `config.address_prefix` are
    /// returned unless `list_all` is set. A failing scan is retried up to
    /// `config.scan_retries` times.
    pub async fn ble_discover(config: &Config, list_all: bool) -> crate::Result<Vec<DiscoveredDevice>> {
        config.validate()?;
        let adapter = first_adapter().await?;

        let mut attempt = 0;
        let devices = loop {
            attempt += 1;
            match scan_once(&adapter, config.scan_timeout).await {
                Ok(devices) => break devices,
                Err(e) if attempt < config.scan_retries => {
                    tracing::info!(
                        "BLE scan failed ({}), retrying. {} retries left",
                        e,
                        config.scan_retries - attempt
                    );
                    let _ = adapter.stop_scan().await;
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                }
                Err(e) => {
                    tracing::error!("BLE scan failed after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        };

        if list_all {
            return Ok(devices);
        }
        Ok(devices
            .into_iter()
            .filter(|d| config.matches_address(&d.address))
            .collect())
    }

    /// Discover and connect to the first matching cooker
    pub async fn ble(config: Config) -> crate::Result<Anova> {
        tracing::info!(
            "Auto connecting, scan timeout set to: {:?}",
            config.scan_timeout
        );
        let devices = Anova::ble_discover(&config, false).await?;
        tracing::debug!("Found these Anova devices: {:?}", devices);

        // One client controls one device; take the first found
        let device = devices
            .first()
            .ok_or_else(|| Error::connection("Did not find Anova device in auto discover mode"))?;
        Anova::ble_connect(device, config).await
    }

    /// Connect to a discovered cooker and subscribe to its notifications
    pub async fn ble_connect(device: &DiscoveredDevice, config: Config) -> crate::Result<Anova> {
        let peripheral = device.peripheral.clone();

        // Check if already connected, disconnect first if so
        if peripheral.is_connected().await.unwrap_or(false) {
            tracing::info!("Device already connected, disconnecting first...");
            let _ = peripheral.disconnect().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let mut connect_attempts = 0;
        loop {
            connect_attempts += 1;
            tracing::info!(
                "Connecting to Anova device {} (attempt {}/{})",
                device.address,
                connect_attempts,
                MAX_CONNECT_ATTEMPTS
            );

            match peripheral.connect().await {
                Ok(_) => {
                    tracing::info!("Connected to: {}", device.address);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Connection attempt {} failed: {}", connect_attempts, e);
                    if connect_attempts >= MAX_CONNECT_ATTEMPTS {
                        return Err(Error::connection(format!(
                            "Failed to connect after {} attempts: {}",
                            MAX_CONNECT_ATTEMPTS, e
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                }
            }
        }

        peripheral
            .discover_services()
            .await
            .map_err(|e| Error::connection(format!("Failed to discover services: {}", e)))?;

        let characteristic = peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == ANOVA_SERVICE_UUID)
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == ANOVA_CHAR_UUID)
            .cloned()
            .ok_or_else(|| Error::connection("Anova characteristic not found on device"))?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| Error::connection(format!("Failed to subscribe: {}", e)))?;
        tracing::info!("Subscribed to notification characteristic: {}", ANOVA_CHAR_UUID);

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| Error::connection(format!("Failed to get notifications: {}", e)))?;

        let transport_connected = Arc::new(AtomicBool::new(true));
        let transport = BleTransport {
            peripheral,
            characteristic,
            connected: transport_connected.clone(),
        };
        let handle = config.command_handle;
        let anova = Anova::with_transport(transport, config)?;

        // Spawn notification task
        let reader = anova.reader().clone();
        let connected = anova.connected.clone();
        let events = anova.events().clone();

        let read_task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != ANOVA_CHAR_UUID {
                    continue;
                }
                reader.handle_notification(handle, &notification.value);
            }

            // Notification stream ended - disconnected
            tracing::info!("Notification stream ended");
            transport_connected.store(false, Ordering::SeqCst);
            *connected.write().await = false;
            events.emit(AnovaEvent::Disconnected);
        });

        anova.attach(read_task).await;

        Ok(anova)
    }
}
