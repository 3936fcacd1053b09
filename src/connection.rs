//! Transport abstraction for the device command channel
//!
//! A transport is an already open, subscribed channel. Writes go through the
//! [`Transport`] trait; inbound notifications are pushed by the transport's
//! own task into a [`crate::NotificationReader`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::Result;

/// Write side of a device connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one command to the device's command characteristic
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Check if connected
    fn is_connected(&self) -> bool {
        true
    }
}

/// A write as seen by whoever drains a [`ChannelTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundWrite {
    /// Attribute handle the write targets
    pub handle: u16,
    /// Bytes written, terminator included
    pub data: Vec<u8>,
}

impl OutboundWrite {
    /// The written command as text, without terminator
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).trim_end().to_string()
    }
}

/// Transport that forwards writes into an mpsc channel
///
/// The receiving end is drained by a writer task, or by a simulated device in
/// tests.
#[derive(Debug)]
pub struct ChannelTransport {
    handle: u16,
    sender: mpsc::Sender<OutboundWrite>,
    connected: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Create a new channel transport and the receiver for its writes
    pub fn new(handle: u16, capacity: usize) -> (Self, mpsc::Receiver<OutboundWrite>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let transport = Self {
            handle,
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        };
        (transport, receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.sender
            .send(OutboundWrite {
                handle: self.handle,
                data: data.to_vec(),
            })
            .await
            .map_err(|_| Error::transport("write channel closed"))
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.sender.is_closed()
    }
}
