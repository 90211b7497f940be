//! Conversation state: turns, typing placeholder, artifact links and the status line.
//!
//! The coordinator is the only place that understands request/reply correlation.

mod conversation;
mod coordinator;
mod status;
mod turn;

pub use conversation::{Applied, Conversation, Resolution};
pub use coordinator::{Coordinator, DisplaySurface, SubmitError};
pub use status::{ConnectionStatus, StatusLine};
pub use turn::{ArtifactLink, Sender, Turn};
