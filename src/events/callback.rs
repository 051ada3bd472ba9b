//! Callback-based event delivery.

use std::sync::Arc;

use crate::session::SessionChange;

use super::handler::{EventHandler, ViewportEvent};

/// Event handler backed by closures.
///
/// # Example
///
/// ```rust,ignore
/// let events = CallbackEvents::new(|event| println!("{}", event))
///     .with_session(|change| println!("{:?}", change));
/// ```
pub struct CallbackEvents<F>
where
    F: Fn(ViewportEvent) + Send + Sync,
{
    callback: F,
    session_callback: Option<Arc<dyn Fn(&SessionChange) + Send + Sync>>,
}

impl<F> CallbackEvents<F>
where
    F: Fn(ViewportEvent) + Send + Sync,
{
    /// Create a handler calling `callback` for viewport transitions.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            session_callback: None,
        }
    }

    /// Also call `callback` for session changes.
    pub fn with_session<S>(mut self, callback: S) -> Self
    where
        S: Fn(&SessionChange) + Send + Sync + 'static,
    {
        self.session_callback = Some(Arc::new(callback));
        self
    }
}

impl<F> EventHandler for CallbackEvents<F>
where
    F: Fn(ViewportEvent) + Send + Sync,
{
    fn on_viewport(&self, event: &ViewportEvent) {
        (self.callback)(event.clone());
    }

    fn on_session(&self, change: &SessionChange) {
        if let Some(ref callback) = self.session_callback {
            callback(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::ViewportStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callbacks_receive_events() {
        let viewport_count = Arc::new(AtomicUsize::new(0));
        let session_count = Arc::new(AtomicUsize::new(0));
        let (v, s) = (viewport_count.clone(), session_count.clone());

        let events = CallbackEvents::new(move |_| {
            v.fetch_add(1, Ordering::SeqCst);
        })
        .with_session(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        events.on_viewport(&ViewportEvent::new(0, 1, ViewportStatus::Loading));
        events.on_viewport(&ViewportEvent::new(0, 1, ViewportStatus::Displaying));
        events.on_session(&SessionChange::Measurements);

        assert_eq!(viewport_count.load(Ordering::SeqCst), 2);
        assert_eq!(session_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_callback_optional() {
        let events = CallbackEvents::new(|_| {});
        events.on_session(&SessionChange::Reset);
    }

    #[test]
    fn test_session_callback_through_handler_object() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let events: Arc<dyn EventHandler> = Arc::new(CallbackEvents::new(|_| {}).with_session(move |change| {
            sink.lock().unwrap().push(change.clone());
        }));

        events.on_session(&SessionChange::StudyClosed);
        events.on_session(&SessionChange::Measurements);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SessionChange::StudyClosed, SessionChange::Measurements]
        );
    }
}
