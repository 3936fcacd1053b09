//! Main Anova client implementation

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::command::{Command, CommandBuilder, Operation, Temperature, TemperatureUnit};
use crate::config::Config;
use crate::connection::Transport;
use crate::correlator::Correlator;
use crate::events::{AnovaEvent, EventSender};
use crate::reader::NotificationReader;
use crate::{Error, Result};

#[cfg(feature = "ble")]
pub mod ble;

/// Client for one Anova cooker
///
/// All methods take `&self`; share the client behind an `Arc` to issue
/// commands from several tasks. Commands are sent one at a time.
pub struct Anova {
    /// Command/response correlator
    correlator: Arc<Correlator>,
    /// Notification reader fed by the transport
    reader: Arc<NotificationReader>,
    /// Diagnostic events
    events: EventSender,
    /// Settings the client was created with
    config: Config,
    /// Timeout used when a call does not give one
    default_timeout: RwLock<Duration>,
    /// Connection state
    pub(crate) connected: Arc<RwLock<bool>>,
    /// Background tasks
    tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Anova {
    /// Create a client over an already open, subscribed transport.
    ///
    /// The transport's notification path must feed [`Anova::reader`].
    /// [`AnovaEvent::Connected`] is published by [`Anova::attach`] once that
    /// path is running.
    pub fn with_transport(transport: impl Transport + 'static, config: Config) -> Result<Self> {
        config.validate()?;

        let events = EventSender::new();
        let connected = transport.is_connected();
        let correlator = Arc::new(Correlator::new(Box::new(transport), events.clone()));
        let reader = Arc::new(NotificationReader::new(
            correlator.clone(),
            config.frame_prefix_len,
        ));

        Ok(Self {
            correlator,
            reader,
            events,
            default_timeout: RwLock::new(config.command_timeout),
            config,
            connected: Arc::new(RwLock::new(connected)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await && self.correlator.transport().is_connected()
    }

    /// Register the task feeding [`Anova::reader`] and announce the
    /// connection to subscribers.
    ///
    /// The task is aborted on [`Anova::disconnect`] or when the client is
    /// dropped.
    pub async fn attach(&self, notification_task: tokio::task::JoinHandle<()>) {
        self.tasks.lock().await.push(notification_task);
        if self.is_connected().await {
            tracing::debug!("Notification task attached");
            self.events.emit(AnovaEvent::Connected);
        }
    }

    /// The reader inbound notifications must be handed to
    pub fn reader(&self) -> &Arc<NotificationReader> {
        &self.reader
    }

    /// The command/response correlator
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Settings the client was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Completed notifications dropped because no command was pending
    pub fn stale_notifications(&self) -> u64 {
        self.correlator.stale_notifications()
    }

    /// Set default timeout
    pub async fn set_default_timeout(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::invalid_param("timeout must be positive"));
        }
        *self.default_timeout.write().await = timeout;
        Ok(())
    }

    /// Get default timeout
    pub async fn default_timeout(&self) -> Duration {
        *self.default_timeout.read().await
    }

    /// Run an operation with the default timeout
    pub async fn execute(&self, op: Operation) -> Result<String> {
        let timeout = self.default_timeout().await;
        self.execute_with_timeout(op, timeout).await
    }

    /// Run an operation with a custom timeout
    pub async fn execute_with_timeout(&self, op: Operation, timeout: Duration) -> Result<String> {
        let command = CommandBuilder::build(&op)?;
        self.send_command(&command, timeout).await
    }

    /// Send a text command as typed, without operation validation
    pub async fn execute_raw(&self, text: &str, timeout: Duration) -> Result<String> {
        let command = Command::raw(text)?;
        self.send_command(&command, timeout).await
    }

    async fn send_command(&self, command: &Command, timeout: Duration) -> Result<String> {
        if !self.is_connected().await {
            return Err(Error::NotConnected);
        }
        self.correlator.execute(command, timeout).await
    }

    // ========== Readers ==========

    /// Device status, `running` or `stopped`
    pub async fn get_status(&self) -> Result<String> {
        self.execute(Operation::ReadStatus).await
    }

    pub async fn get_calibration_factor(&self) -> Result<String> {
        self.execute(Operation::ReadCalibrationFactor).await
    }

    /// Recent temperature samples, oldest first
    pub async fn get_temperature_history(&self) -> Result<Vec<String>> {
        let history = self.execute(Operation::ReadTemperatureHistory).await?;
        Ok(history.split_whitespace().map(str::to_string).collect())
    }

    pub async fn get_target_temperature(&self) -> Result<String> {
        self.execute(Operation::ReadTargetTemperature).await
    }

    pub async fn get_current_temperature(&self) -> Result<String> {
        self.execute(Operation::ReadCurrentTemperature).await
    }

    /// Timer state, minutes remaining followed by `running` or `stopped`
    pub async fn get_timer(&self) -> Result<String> {
        self.execute(Operation::ReadTimer).await
    }

    pub async fn get_unit(&self) -> Result<String> {
        self.execute(Operation::ReadUnit).await
    }

    // ========== Controllers ==========

    /// Start cooking
    pub async fn start(&self) -> Result<String> {
        self.execute(Operation::Start).await
    }

    /// Stop cooking
    pub async fn stop(&self) -> Result<String> {
        self.execute(Operation::Stop).await
    }

    pub async fn start_timer(&self) -> Result<String> {
        self.execute(Operation::StartTimer).await
    }

    pub async fn stop_timer(&self) -> Result<String> {
        self.execute(Operation::StopTimer).await
    }

    // ========== Setters ==========

    /// Set the calibration factor, within [-9.9, 9.9]
    pub async fn set_calibration_factor(&self, factor: f32) -> Result<String> {
        self.execute(Operation::SetCalibrationFactor(factor)).await
    }

    /// Set the target temperature.
    ///
    /// `unit` must be the unit the device currently uses; it selects the
    /// allowed range ([5.0, 99.9] °C or [41.0, 211.8] °F).
    pub async fn set_temperature(&self, value: f32, unit: TemperatureUnit) -> Result<String> {
        self.execute(Operation::SetTargetTemperature(Temperature { value, unit }))
            .await
    }

    /// Set the timer in minutes, within [0, 6000]
    pub async fn set_timer(&self, minutes: u32) -> Result<String> {
        self.execute(Operation::SetTimer(minutes)).await
    }

    pub async fn set_unit(&self, unit: TemperatureUnit) -> Result<String> {
        self.execute(Operation::SetUnit(unit)).await
    }

    /// Set the unit from text, `c` or `f` in any case
    pub async fn set_unit_str(&self, unit: &str) -> Result<String> {
        let unit: TemperatureUnit = unit.parse()?;
        self.set_unit(unit).await
    }

    // ========== Events & lifecycle ==========

    /// Subscribe to connection events
    pub fn subscribe(&self) -> broadcast::Receiver<AnovaEvent> {
        self.events.subscribe()
    }

    /// Create a stream of all events emitted from now on
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    ///
    /// let mut stream = anova.event_stream();
    /// while let Some(event) = stream.next().await {
    ///     println!("Event: {:?}", event);
    /// }
    /// ```
    pub fn event_stream(&self) -> impl futures::Stream<Item = AnovaEvent> + Unpin {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|result| std::future::ready(result.ok()))
    }

    /// Disconnect from the device
    pub async fn disconnect(&self) -> Result<()> {
        tracing::info!("Disconnecting from Anova device");
        *self.connected.write().await = false;

        // Abort all background tasks
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        let result = self.correlator.transport().disconnect().await;
        self.reader.reset();
        self.events.emit(AnovaEvent::Disconnected);
        tracing::info!("Disconnected");
        result
    }

    #[cfg(feature = "ble")]
    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }
}

impl Drop for Anova {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelTransport, OutboundWrite};
    use crate::protocol::COMMAND_HANDLE;
    use tokio::sync::mpsc;

    /// Simulated cooker answering over the notification path
    fn spawn_cooker(anova: &Anova, mut writes: mpsc::Receiver<OutboundWrite>) {
        let reader = anova.reader().clone();
        tokio::spawn(async move {
            let mut unit = "c".to_string();
            while let Some(write) = writes.recv().await {
                assert_eq!(write.handle, COMMAND_HANDLE);
                let cmd = write.text();
                let response = match cmd.as_str() {
                    "status" => "stopped".to_string(),
                    "read temp" => "25.3".to_string(),
                    "read set temp" => "42.0".to_string(),
                    "read data" => "25.1 25.2\n25.3".to_string(),
                    "read unit" => unit.clone(),
                    "start" => "start".to_string(),
                    "silent" => continue,
                    other if other.starts_with("set unit ") => {
                        unit = other["set unit ".len()..].to_string();
                        unit.clone()
                    }
                    other if other.starts_with("set temp ") => {
                        other["set temp ".len()..].to_string()
                    }
                    _ => "Invalid Command".to_string(),
                };
                // Split every answer in two notifications
                let frame = format!("\x00\x00\x00{}\r", response).into_bytes();
                let (head, tail) = frame.split_at(frame.len() / 2);
                reader.handle_notification(COMMAND_HANDLE, head);
                reader.handle_notification(COMMAND_HANDLE, tail);
            }
        });
    }

    fn client() -> (Anova, mpsc::Receiver<OutboundWrite>) {
        let (transport, writes) = ChannelTransport::new(COMMAND_HANDLE, 16);
        let anova = Anova::with_transport(transport, Config::default()).unwrap();
        (anova, writes)
    }

    #[tokio::test]
    async fn test_getters() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);

        assert!(anova.is_connected().await);
        assert_eq!(anova.get_status().await.unwrap(), "stopped");
        assert_eq!(anova.get_current_temperature().await.unwrap(), "25.3");
        assert_eq!(anova.get_target_temperature().await.unwrap(), "42.0");
        assert_eq!(
            anova.get_temperature_history().await.unwrap(),
            vec!["25.1", "25.2", "25.3"]
        );
        assert_eq!(anova.start().await.unwrap(), "start");
    }

    #[tokio::test]
    async fn test_setters() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);

        assert_eq!(anova.set_unit_str("F").await.unwrap(), "f");
        assert_eq!(anova.get_unit().await.unwrap(), "f");
        assert_eq!(
            anova
                .set_temperature(135.0, TemperatureUnit::Fahrenheit)
                .await
                .unwrap(),
            "135.0"
        );
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_reach_device() {
        let (anova, mut writes) = client();

        let err = anova
            .set_temperature(135.0, TemperatureUnit::Celsius)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(anova.set_unit_str("kelvin").await.is_err());
        assert!(anova.set_timer(7000).await.is_err());
        assert!(writes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_raw_command_rejected_by_device() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);

        let err = anova
            .execute_raw("bogus", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolRejected(ref cmd) if cmd == "bogus"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_applies() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);

        anova
            .set_default_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(anova.default_timeout().await, Duration::from_millis(100));
        assert!(anova.set_default_timeout(Duration::ZERO).await.is_err());

        let start = tokio::time::Instant::now();
        let err = anova
            .execute_raw("silent", anova.default_timeout().await)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= Duration::from_millis(100));

        // The client stays usable after a timeout
        assert_eq!(anova.get_status().await.unwrap(), "stopped");
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);
        let mut events = anova.subscribe();

        anova.disconnect().await.unwrap();
        assert!(!anova.is_connected().await);
        assert_eq!(events.recv().await.unwrap(), AnovaEvent::Disconnected);
        assert!(matches!(anova.get_status().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_attach_announces_connection() {
        let (anova, _writes) = client();
        let mut events = anova.subscribe();
        let mut stream = anova.event_stream();

        let (mut stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let feeder = tokio::spawn(async move {
            let _ = stop_rx.await;
        });
        anova.attach(feeder).await;

        assert_eq!(events.recv().await.unwrap(), AnovaEvent::Connected);
        assert_eq!(stream.next().await, Some(AnovaEvent::Connected));
        assert_eq!(anova.tasks.lock().await.len(), 1);

        anova.disconnect().await.unwrap();
        assert!(anova.tasks.lock().await.is_empty());
        // The aborted task drops its receiver
        stop_tx.closed().await;
    }

    #[tokio::test]
    async fn test_closed_transport_reports_disconnected() {
        let (anova, writes) = client();
        assert!(anova.is_connected().await);

        drop(writes);
        assert!(!anova.is_connected().await);
        assert!(matches!(anova.get_status().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_event_stream_reports_responses() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);
        let mut stream = anova.event_stream();

        anova.get_current_temperature().await.unwrap();
        assert_eq!(
            stream.next().await,
            Some(AnovaEvent::Response {
                command: "read temp".to_string(),
                response: "25.3".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_concurrent_callers_get_their_own_responses() {
        let (anova, writes) = client();
        spawn_cooker(&anova, writes);
        let anova = Arc::new(anova);

        let temp = {
            let anova = anova.clone();
            tokio::spawn(async move { anova.get_current_temperature().await })
        };
        let status = {
            let anova = anova.clone();
            tokio::spawn(async move { anova.get_status().await })
        };
        let target = anova.get_target_temperature().await.unwrap();

        assert_eq!(temp.await.unwrap().unwrap(), "25.3");
        assert_eq!(status.await.unwrap().unwrap(), "stopped");
        assert_eq!(target, "42.0");
        assert_eq!(anova.stale_notifications(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (transport, _writes) = ChannelTransport::new(COMMAND_HANDLE, 1);
        let config = Config::default().with_scan_retries(0);
        assert!(Anova::with_transport(transport, config).is_err());
    }
}
