//! The persistent real-time channel, as seen from the client.
//!
//! Inbound events reach the client through [`SimClient::handle_event`](crate::client::SimClient::handle_event)
//! or the runtime's command queue; this module only covers the outbound half.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;

use crate::{
    error::{Result, SimError},
    protocol::OutboundEvent,
};

pub trait ChannelTransport: Send {
    fn is_connected(&self) -> bool;

    /// Queue an event for delivery. Never blocks.
    fn emit(&mut self, event: OutboundEvent) -> Result<()>;
}

impl<T: ChannelTransport + ?Sized> ChannelTransport for Box<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        (**self).emit(event)
    }
}

/// In-process transport whose outbound events land in a [`LoopbackPeer`].
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<OutboundEvent>,
    connected: Arc<AtomicBool>,
}

/// The far end of a [`LoopbackTransport`].
#[derive(Debug)]
pub struct LoopbackPeer {
    rx: mpsc::UnboundedReceiver<OutboundEvent>,
    connected: Arc<AtomicBool>,
}

impl LoopbackTransport {
    /// A connected transport and its peer.
    pub fn pair() -> (Self, LoopbackPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        (
            Self {
                tx,
                connected: connected.clone(),
            },
            LoopbackPeer { rx, connected },
        )
    }
}

impl ChannelTransport for LoopbackTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(SimError::Disconnected);
        }
        self.tx
            .send(event)
            .map_err(|e| SimError::Transport(format!("peer dropped: {}", e.0.event_name())))
    }
}

impl LoopbackPeer {
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Simulate the channel dropping or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}
