//! Persistent WebSocket connection to the agent service.
//!
//! `ConnectionManager` owns the socket and the reconnect timer, publishes lifecycle
//! events (`connecting`, `open`, `reconnecting`, `error`, `close`, `disconnected`) and
//! decoded inbound envelopes. It knows nothing about chat semantics.

mod events;
mod machine;
mod manager;

pub use events::{ConnectionError, ConnectionEvent, EventBus, EventKind, Subscription};
pub use machine::{ConnectionMachine, ConnectionState, Effect, Input, ReconnectPolicy};
pub use manager::{ConnectionConfig, ConnectionManager, RequestSink, SendError};
