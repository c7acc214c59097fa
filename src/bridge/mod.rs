//! Lifecycle Bridge Module
//!
//! Connects transport events to the protocol handler and lifecycle listeners.

pub mod handler;
pub mod lifecycle;
pub mod listener;

pub use handler::ChannelHandler;
pub use lifecycle::LifecycleBridge;
pub use listener::{
    EventContext, LifecycleEvent, LifecycleListener, ListenerSet, ListenerSetBuilder,
};
