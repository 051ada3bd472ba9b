//! State-change notifications for the control surface.
//!
//! Viewport load-state transitions and session changes are delivered to an
//! [`EventHandler`], either through closures or an MPSC channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use medimg_view::events::{ChannelEvents, EngineEvent};
//!
//! let (events, receiver) = ChannelEvents::new();
//! let engine = ViewerEngine::new(config, catalog, findings)?.with_events(events);
//! for event in receiver.try_iter() {
//!     println!("{:?}", event);
//! }
//! ```

mod callback;
mod channel;
mod handler;

pub use callback::CallbackEvents;
pub use channel::{ChannelEvents, EventReceiver};
pub use handler::{EngineEvent, EventHandler, NullEvents, ViewportEvent};
