//! Event handler trait and event types.

use serde::Serialize;

use crate::session::SessionChange;
use crate::viewport::ViewportStatus;

/// A viewport load-state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewportEvent {
    /// Grid cell index.
    pub viewport: usize,
    /// Request token the transition belongs to (0 when none).
    pub token: u64,
    /// State entered.
    pub status: ViewportStatus,
}

impl ViewportEvent {
    /// Create an event.
    pub fn new(viewport: usize, token: u64, status: ViewportStatus) -> Self {
        Self { viewport, token, status }
    }
}

impl std::fmt::Display for ViewportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[viewport {}] {}", self.viewport, self.status)
    }
}

/// Any notification delivered to the control surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineEvent {
    /// A viewport changed load state.
    Viewport(ViewportEvent),
    /// Session state changed.
    Session(SessionChange),
}

/// Observer of engine state changes.
///
/// Handlers are called synchronously on the thread that drives the engine,
/// in the order transitions happen.
pub trait EventHandler: Send + Sync {
    /// Called on each viewport state transition.
    fn on_viewport(&self, event: &ViewportEvent);

    /// Called for each session change an action produced.
    fn on_session(&self, change: &SessionChange) {
        let _ = change;
    }
}

/// Handler that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvents;

impl EventHandler for NullEvents {
    fn on_viewport(&self, _event: &ViewportEvent) {}
    fn on_session(&self, _change: &SessionChange) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = ViewportEvent::new(2, 7, ViewportStatus::Loading);
        assert_eq!(event.to_string(), "[viewport 2] Loading");
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = EngineEvent::Viewport(ViewportEvent::new(0, 1, ViewportStatus::Displaying));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "viewport");
        assert_eq!(json["viewport"], 0);
    }
}
