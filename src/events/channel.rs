//! Channel-based event delivery.
//!
//! Sends every event through an MPSC channel so another thread (a UI loop,
//! a logger) can consume them in order.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

use crate::session::SessionChange;

use super::handler::{EngineEvent, EventHandler, ViewportEvent};

/// Event handler that forwards to a channel.
pub struct ChannelEvents {
    sender: Sender<EngineEvent>,
}

impl ChannelEvents {
    /// Create a handler and its receiving end.
    pub fn new() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, EventReceiver { receiver })
    }
}

impl EventHandler for ChannelEvents {
    fn on_viewport(&self, event: &ViewportEvent) {
        // receiver may have been dropped
        let _ = self.sender.send(EngineEvent::Viewport(event.clone()));
    }

    fn on_session(&self, change: &SessionChange) {
        let _ = self.sender.send(EngineEvent::Session(change.clone()));
    }
}

/// Receiving end of a [`ChannelEvents`].
pub struct EventReceiver {
    receiver: Receiver<EngineEvent>,
}

impl EventReceiver {
    /// Block for the next event.
    pub fn recv(&self) -> Result<EngineEvent, mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Next event if one is queued.
    pub fn try_recv(&self) -> Result<EngineEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<EngineEvent, mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every queued event.
    pub fn try_iter(&self) -> impl Iterator<Item = EngineEvent> + '_ {
        self.receiver.try_iter()
    }

    /// Queued viewport transitions for one cell, in order.
    pub fn drain_viewport(&self, viewport: usize) -> Vec<ViewportEvent> {
        self.try_iter()
            .filter_map(|event| match event {
                EngineEvent::Viewport(e) if e.viewport == viewport => Some(e),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::ViewportStatus;

    #[test]
    fn test_channel_preserves_order() {
        let (events, receiver) = ChannelEvents::new();
        events.on_viewport(&ViewportEvent::new(0, 1, ViewportStatus::Loading));
        events.on_session(&SessionChange::Measurements);
        events.on_viewport(&ViewportEvent::new(0, 1, ViewportStatus::Displaying));

        assert!(matches!(receiver.try_recv(), Ok(EngineEvent::Viewport(_))));
        assert_eq!(receiver.try_recv().unwrap(), EngineEvent::Session(SessionChange::Measurements));
        match receiver.try_recv().unwrap() {
            EngineEvent::Viewport(e) => assert_eq!(e.status, ViewportStatus::Displaying),
            other => panic!("unexpected {:?}", other),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_drain_viewport_filters() {
        let (events, receiver) = ChannelEvents::new();
        events.on_viewport(&ViewportEvent::new(0, 1, ViewportStatus::Loading));
        events.on_viewport(&ViewportEvent::new(1, 2, ViewportStatus::Loading));
        assert_eq!(receiver.drain_viewport(1).len(), 1);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (events, receiver) = ChannelEvents::new();
        drop(receiver);
        events.on_viewport(&ViewportEvent::new(0, 1, ViewportStatus::Idle));
    }
}
