//! Connection status line derived from lifecycle events.

use std::time::{Duration, Instant};

use crate::connection::{ConnectionError, ConnectionEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { secs: u64 },
    ConnectionError,
    Closed,
    MaxAttemptsReached,
}

impl ConnectionStatus {
    /// Next status after `event`.
    pub fn after(&self, event: &ConnectionEvent) -> ConnectionStatus {
        match event {
            ConnectionEvent::Connecting => ConnectionStatus::Connecting,
            ConnectionEvent::Open => ConnectionStatus::Connected,
            ConnectionEvent::Reconnecting { delay, .. } => ConnectionStatus::Reconnecting {
                secs: ceil_secs(*delay),
            },
            ConnectionEvent::Error(ConnectionError::MaxAttemptsReached { .. }) => {
                ConnectionStatus::MaxAttemptsReached
            }
            ConnectionEvent::Error(_) => ConnectionStatus::ConnectionError,
            ConnectionEvent::Close { .. } => ConnectionStatus::Closed,
            // Budget exhausted: keep saying so rather than a generic "disconnected".
            ConnectionEvent::Disconnected => ConnectionStatus::MaxAttemptsReached,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ConnectionStatus::Disconnected => "Disconnected".to_string(),
            ConnectionStatus::Connecting => "Connecting...".to_string(),
            ConnectionStatus::Connected => "Connected".to_string(),
            ConnectionStatus::Reconnecting { secs } => format!("Reconnecting in {}s...", secs),
            ConnectionStatus::ConnectionError => "Connection Error".to_string(),
            ConnectionStatus::Closed => "Closed".to_string(),
            ConnectionStatus::MaxAttemptsReached => {
                "Max reconnect attempts reached. Cannot establish connection.".to_string()
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::ConnectionError | ConnectionStatus::MaxAttemptsReached
        )
    }
}

fn ceil_secs(delay: Duration) -> u64 {
    let millis = delay.as_millis();
    millis.div_ceil(1000) as u64
}

/// Status plus the "connected" banner window: `Connected` is shown briefly, then hidden.
#[derive(Debug, Clone)]
pub struct StatusLine {
    status: ConnectionStatus,
    connected_at: Option<Instant>,
    banner: Duration,
}

impl StatusLine {
    pub fn new(banner: Duration) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            connected_at: None,
            banner,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Apply `event`; returns true when the status changed.
    pub fn update(&mut self, event: &ConnectionEvent, now: Instant) -> bool {
        let next = self.status.after(event);
        self.connected_at = match next {
            ConnectionStatus::Connected => Some(now),
            _ => None,
        };
        let changed = next != self.status;
        self.status = next;
        changed
    }

    /// Text to show at `now`, or `None` once the connected banner has expired.
    pub fn visible(&self, now: Instant) -> Option<String> {
        match (&self.status, self.connected_at) {
            (ConnectionStatus::Connected, Some(at)) if now.duration_since(at) >= self.banner => None,
            (status, _) => Some(status.label()),
        }
    }
}
