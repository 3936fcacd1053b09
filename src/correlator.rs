//! Command/response correlation over a single notification channel
//!
//! The device answers on a notification stream that carries no request id.
//! Correctness rests on two pieces of state owned by [`Correlator`]:
//!
//! - a single-flight lock held for the whole write-then-wait cycle, so at
//!   most one command is ever outstanding;
//! - a pending slot that is `Armed` only while that cycle waits. Delivery and
//!   timeout both try to move the slot out of `Armed` under its mutex, and
//!   whichever gets there first decides the outcome.
//!
//! A payload that completes while the slot is `Idle` is stale and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::command::Command;
use crate::connection::Transport;
use crate::events::{AnovaEvent, EventSender};
use crate::protocol::RESP_INVALID_COMMAND;
use crate::{Error, Result};

/// Outcome of handing a completed payload to the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Payload woke the caller waiting on request `id`
    Accepted { id: u64 },
    /// No request was pending; payload dropped
    Stale,
}

struct ArmedRequest {
    id: u64,
    command: String,
    reply: oneshot::Sender<Vec<u8>>,
}

enum PendingSlot {
    Idle,
    Armed(ArmedRequest),
}

/// Serializes commands and matches each one to the next completed response
pub struct Correlator {
    transport: Box<dyn Transport>,
    /// Single-flight lock; tokio's mutex queues waiters in FIFO order
    flight: tokio::sync::Mutex<()>,
    slot: Mutex<PendingSlot>,
    next_id: AtomicU64,
    /// Bumped every time a request is armed
    epoch: AtomicU64,
    stale: AtomicU64,
    events: EventSender,
}

impl Correlator {
    /// Create a correlator writing through `transport`
    pub fn new(transport: Box<dyn Transport>, events: EventSender) -> Self {
        Self {
            transport,
            flight: tokio::sync::Mutex::new(()),
            slot: Mutex::new(PendingSlot::Idle),
            next_id: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            events,
        }
    }

    /// The transport commands are written to
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Number of completed payloads dropped because nothing was pending
    pub fn stale_notifications(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Arming generation; changes whenever a new command is armed.
    ///
    /// A partial frame started under an older epoch cannot belong to the
    /// command armed now.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Whether a command is currently waiting for its response
    pub fn is_pending(&self) -> bool {
        matches!(*self.lock_slot(), PendingSlot::Armed(_))
    }

    /// Send a command and wait for its response.
    ///
    /// Concurrent callers are queued; each write happens only after the
    /// previous command was answered or timed out. The returned text has
    /// framing removed and is trimmed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidParameter`] if `timeout` is zero
    /// - [`Error::Transport`] if the write fails (not retried)
    /// - [`Error::ResponseTimeout`] if nothing arrives within `timeout`
    /// - [`Error::ProtocolRejected`] if the device answers `Invalid Command`
    /// - [`Error::Protocol`] if the response is not UTF-8
    pub async fn execute(&self, command: &Command, timeout: Duration) -> Result<String> {
        if timeout.is_zero() {
            return Err(Error::invalid_param("timeout must be positive"));
        }

        let _flight = self.flight.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut reply = self.arm(id, command);
        let armed = ArmedGuard { correlator: self, id };

        tracing::debug!(id, command = %command, "Writing command");
        if let Err(e) = self.transport.write(command.as_bytes()).await {
            tracing::error!(id, command = %command, "Failed to write command: {}", e);
            return Err(e);
        }

        tracing::debug!(id, ?timeout, "Waiting for response");
        let payload = match tokio::time::timeout(timeout, &mut reply).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => {
                // Sender dropped without sending: the slot was cleared under us
                return Err(Error::Channel(format!(
                    "Pending response for [{}] was discarded",
                    command
                )));
            }
            Err(_) => {
                if armed.disarm() {
                    tracing::warn!(id, command = %command, ?timeout, "Timed out waiting for response");
                    return Err(Error::timeout(command.text(), timeout));
                }
                // Delivery took the slot first; its payload is already sent
                reply.try_recv().map_err(|_| Error::timeout(command.text(), timeout))?
            }
        };

        let response = decode_response(&payload, command)?;
        tracing::debug!(id, command = %command, response = %response, "Received response");
        self.events.emit(AnovaEvent::Response {
            command: command.text().to_string(),
            response: response.clone(),
        });
        Ok(response)
    }

    /// Hand a completed, de-framed payload to the pending request.
    ///
    /// Never blocks. Accepted only while a request is armed; otherwise the
    /// payload is counted and dropped.
    pub fn deliver(&self, payload: Vec<u8>) -> Delivery {
        let mut slot = self.lock_slot();
        let payload = match std::mem::replace(&mut *slot, PendingSlot::Idle) {
            PendingSlot::Armed(request) => {
                // Send under the slot lock so a racing timeout sees the payload
                match request.reply.send(payload) {
                    Ok(()) => {
                        tracing::trace!(id = request.id, command = %request.command, "Delivered response");
                        return Delivery::Accepted { id: request.id };
                    }
                    Err(payload) => payload,
                }
            }
            PendingSlot::Idle => payload,
        };
        drop(slot);

        tracing::warn!("Dropping notification with no pending command");
        self.discard(&payload);
        Delivery::Stale
    }

    /// Count and publish a payload that no request will receive
    pub(crate) fn discard(&self, payload: &[u8]) {
        self.stale.fetch_add(1, Ordering::Relaxed);
        let payload = String::from_utf8_lossy(payload).trim().to_string();
        tracing::debug!(payload = %payload, "Discarded stale payload");
        self.events.emit(AnovaEvent::StaleNotification { payload });
    }

    fn arm(&self, id: u64, command: &Command) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        let mut slot = self.lock_slot();
        if let PendingSlot::Armed(previous) = &*slot {
            tracing::warn!(
                previous = previous.id,
                command = %previous.command,
                "Clearing leftover pending request"
            );
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *slot = PendingSlot::Armed(ArmedRequest {
            id,
            command: command.text().to_string(),
            reply: tx,
        });
        rx
    }

    /// Move the slot back to `Idle` if it is still armed for `id`
    fn disarm(&self, id: u64) -> bool {
        let mut slot = self.lock_slot();
        match &*slot {
            PendingSlot::Armed(request) if request.id == id => {
                *slot = PendingSlot::Idle;
                true
            }
            _ => false,
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, PendingSlot> {
        // Slot updates are single assignments, so a poisoned value is still consistent
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Disarms the slot when the owning `execute` call ends, however it ends
struct ArmedGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
}

impl ArmedGuard<'_> {
    fn disarm(&self) -> bool {
        self.correlator.disarm(self.id)
    }
}

impl Drop for ArmedGuard<'_> {
    fn drop(&mut self) {
        self.correlator.disarm(self.id);
    }
}

/// Decode a de-framed payload into response text
fn decode_response(payload: &[u8], command: &Command) -> Result<String> {
    let text = std::str::from_utf8(payload).map_err(|e| {
        Error::protocol(format!("Response to [{}] is not valid UTF-8: {}", command, e))
    })?;
    let text = text.trim();
    if text == RESP_INVALID_COMMAND {
        return Err(Error::ProtocolRejected(command.text().to_string()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelTransport, OutboundWrite};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn correlator() -> (Arc<Correlator>, mpsc::Receiver<OutboundWrite>) {
        let (transport, writes) = ChannelTransport::new(0x25, 16);
        let correlator = Arc::new(Correlator::new(Box::new(transport), EventSender::new()));
        (correlator, writes)
    }

    /// Answers every write with `answer(command)` after `delay`
    fn spawn_device<F>(
        correlator: Arc<Correlator>,
        mut writes: mpsc::Receiver<OutboundWrite>,
        delay: Duration,
        answer: F,
    ) where
        F: Fn(&str) -> Option<String> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(write) = writes.recv().await {
                if let Some(response) = answer(&write.text()) {
                    tokio::time::sleep(delay).await;
                    correlator.deliver(response.into_bytes());
                }
            }
        });
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (correlator, writes) = correlator();
        spawn_device(correlator.clone(), writes, Duration::from_millis(5), |cmd| {
            match cmd {
                "read temp" => Some("25.3".to_string()),
                "set unit c" => Some("ok".to_string()),
                _ => Some(RESP_INVALID_COMMAND.to_string()),
            }
        });

        let timeout = Duration::from_secs(1);
        let temp = correlator
            .execute(&Command::new("read temp"), timeout)
            .await
            .unwrap();
        assert_eq!(temp, "25.3");

        let unit = correlator
            .execute(&Command::new("set unit c"), timeout)
            .await
            .unwrap();
        assert_eq!(unit, "ok");

        let err = correlator
            .execute(&Command::new("bogus"), timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolRejected(ref cmd) if cmd == "bogus"));
        assert!(!correlator.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_boundary() {
        let (correlator, _writes) = correlator();
        let timeout = Duration::from_millis(100);

        let start = Instant::now();
        let err = correlator
            .execute(&Command::new("read temp"), timeout)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        match err {
            Error::ResponseTimeout { command, timeout: t } => {
                assert_eq!(command, "read temp");
                assert_eq!(t, timeout);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(10));
        assert!(!correlator.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_not_given_to_next_command() {
        let (correlator, mut writes) = correlator();
        let (timed_out_tx, timed_out_rx) = oneshot::channel::<()>();
        let (late_tx, late_rx) = oneshot::channel::<Delivery>();

        let device = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                // A: answered only after its caller gave up
                let a = writes.recv().await.unwrap();
                assert_eq!(a.text(), "read temp");
                timed_out_rx.await.unwrap();
                let _ = late_tx.send(correlator.deliver(b"99.9".to_vec()));

                // B: answered normally
                let b = writes.recv().await.unwrap();
                assert_eq!(b.text(), "read unit");
                tokio::time::sleep(Duration::from_millis(20)).await;
                correlator.deliver(b"c".to_vec())
            })
        };

        let a = correlator
            .execute(&Command::new("read temp"), Duration::from_millis(100))
            .await;
        assert!(a.unwrap_err().is_timeout());
        timed_out_tx.send(()).unwrap();
        assert_eq!(late_rx.await.unwrap(), Delivery::Stale);

        let b = correlator
            .execute(&Command::new("read unit"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(b, "c");

        assert!(matches!(device.await.unwrap(), Delivery::Accepted { .. }));
        assert_eq!(correlator.stale_notifications(), 1);
    }

    #[tokio::test]
    async fn test_deliver_without_pending_is_stale() {
        let (correlator, _writes) = correlator();
        let mut events = correlator.events.subscribe();

        assert_eq!(correlator.deliver(b"25.3".to_vec()), Delivery::Stale);
        assert_eq!(correlator.stale_notifications(), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            AnovaEvent::StaleNotification {
                payload: "25.3".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let (correlator, mut writes) = correlator();
        let err = correlator
            .execute(&Command::new("status"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(writes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_failure_releases_lock() {
        let (correlator, writes) = correlator();
        drop(writes);

        for _ in 0..2 {
            let err = correlator
                .execute(&Command::new("start"), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Transport(_)));
            assert!(!correlator.is_pending());
        }
    }

    #[tokio::test]
    async fn test_non_utf8_response() {
        let (correlator, writes) = correlator();
        let correlator2 = correlator.clone();
        tokio::spawn(async move {
            let mut writes = writes;
            writes.recv().await;
            correlator2.deliver(vec![0xff, 0xfe]);
        });

        let err = correlator
            .execute(&Command::new("read temp"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_disarms_slot() {
        let (correlator, _writes) = correlator();

        let cmd = Command::new("read timer");
        let pending = correlator.execute(&cmd, Duration::from_secs(5));
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(!correlator.is_pending());
        assert_eq!(correlator.deliver(b"0 stopped".to_vec()), Delivery::Stale);
    }

    /// Fails the test if two writes overlap an outstanding response window
    struct ExclusiveTransport {
        busy: Arc<AtomicBool>,
        writes: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for ExclusiveTransport {
        async fn write(&self, data: &[u8]) -> Result<()> {
            assert!(
                !self.busy.swap(true, Ordering::SeqCst),
                "write issued while another command was outstanding"
            );
            let text = String::from_utf8_lossy(data).trim_end().to_string();
            self.writes
                .send(text)
                .map_err(|_| Error::transport("device gone"))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_under_concurrency() {
        let busy = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = ExclusiveTransport {
            busy: busy.clone(),
            writes: tx,
        };
        let correlator = Arc::new(Correlator::new(Box::new(transport), EventSender::new()));

        {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                while let Some(cmd) = rx.recv().await {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    // Clear before delivering: the next write may follow immediately
                    busy.store(false, Ordering::SeqCst);
                    let echo = cmd.trim_start_matches("echo ").to_string();
                    correlator.deliver(echo.into_bytes());
                }
            });
        }

        let mut callers = Vec::new();
        for i in 0..16 {
            let correlator = correlator.clone();
            callers.push(tokio::spawn(async move {
                let response = correlator
                    .execute(&Command::new(format!("echo {}", i)), Duration::from_secs(5))
                    .await
                    .unwrap();
                assert_eq!(response, i.to_string());
            }));
        }
        for caller in callers {
            caller.await.unwrap();
        }
        assert_eq!(correlator.stale_notifications(), 0);
    }

    #[tokio::test]
    async fn test_arming_advances_epoch() {
        let (correlator, _writes) = correlator();
        assert_eq!(correlator.epoch(), 0);

        let cmd = Command::new("read temp");
        let _ = correlator.execute(&cmd, Duration::from_millis(1)).await;
        assert_eq!(correlator.epoch(), 1);
        let _ = correlator.execute(&cmd, Duration::from_millis(1)).await;
        assert_eq!(correlator.epoch(), 2);
    }

    #[test]
    fn test_decode_response_trims() {
        let cmd = Command::new("read temp");
        assert_eq!(decode_response(b" 25.3 \n", &cmd).unwrap(), "25.3");
        assert!(matches!(
            decode_response(b"Invalid Command", &cmd),
            Err(Error::ProtocolRejected(_))
        ));
    }
}
