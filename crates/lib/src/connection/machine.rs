//! Connection lifecycle state machine and reconnect backoff.
//!
//! Pure: `ConnectionMachine::step` maps one input to the effects the driver must carry out.
//! No sockets or timers live here, so retry behaviour is testable on its own.

use std::time::Duration;

use super::events::{ConnectionError, ConnectionEvent};

/// Lifecycle state of the single socket owned by a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// Reconnect budget exhausted. Left only by an explicit `connect()`.
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Disconnected => "disconnected",
        }
    }

    /// True while a socket exists or is being established.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff: `min(base * 2^(attempt-1), cap)`, giving up at `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 15,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether attempt number `attempt` may still be scheduled.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Something that happened to the connection, fed to the machine by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Explicit `connect()` from a caller.
    Connect,
    /// The reconnect timer elapsed.
    RetryDue,
    Opened,
    TransportError(String),
    DecodeError(String),
    /// Explicit `close()` from a caller.
    CloseRequested,
    /// The socket is gone (closed by either side, or the connect attempt failed).
    Closed { code: Option<u16>, reason: String },
    Teardown,
}

/// Work the driver must perform after a transition, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Emit(ConnectionEvent),
    OpenSocket,
    CloseSocket,
    ScheduleRetry(Duration),
    CancelRetry,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    policy: ReconnectPolicy,
    attempt: u32,
    retry_pending: bool,
    close_requested: bool,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
            attempt: 0,
            retry_pending: false,
            close_requested: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn step(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Connect => self.on_connect(true),
            Input::RetryDue => {
                if !self.retry_pending {
                    return Vec::new();
                }
                self.retry_pending = false;
                self.on_connect(false)
            }
            Input::Opened => {
                if self.state != ConnectionState::Connecting {
                    return Vec::new();
                }
                self.state = ConnectionState::Open;
                if self.attempt > 0 {
                    log::info!("reconnected after {} attempt(s); attempts reset", self.attempt);
                }
                self.attempt = 0;
                vec![Effect::Emit(ConnectionEvent::Open)]
            }
            Input::TransportError(message) => {
                vec![Effect::Emit(ConnectionEvent::Error(ConnectionError::Transport(
                    message,
                )))]
            }
            Input::DecodeError(message) => {
                vec![Effect::Emit(ConnectionEvent::Error(ConnectionError::Decode(
                    message,
                )))]
            }
            Input::CloseRequested => {
                if self.state != ConnectionState::Open {
                    return Vec::new();
                }
                self.state = ConnectionState::Closing;
                self.close_requested = true;
                vec![Effect::CloseSocket]
            }
            Input::Closed { code, reason } => self.on_closed(code, reason),
            Input::Teardown => {
                let mut effects = Vec::new();
                if self.retry_pending {
                    self.retry_pending = false;
                    effects.push(Effect::CancelRetry);
                }
                if self.state.is_live() {
                    effects.push(Effect::CloseSocket);
                }
                self.close_requested = true;
                self.state = ConnectionState::Closed;
                effects
            }
        }
    }

    fn on_connect(&mut self, explicit: bool) -> Vec<Effect> {
        if self.state.is_live() {
            log::debug!("connect ignored: connection is already {}", self.state);
            return Vec::new();
        }
        let mut effects = Vec::new();
        if self.retry_pending {
            self.retry_pending = false;
            effects.push(Effect::CancelRetry);
        }
        if explicit && self.state == ConnectionState::Disconnected {
            self.attempt = 0;
        }
        self.close_requested = false;
        self.state = ConnectionState::Connecting;
        effects.push(Effect::Emit(ConnectionEvent::Connecting));
        effects.push(Effect::OpenSocket);
        effects
    }

    fn on_closed(&mut self, code: Option<u16>, reason: String) -> Vec<Effect> {
        if !self.state.is_live() {
            return Vec::new();
        }
        self.state = ConnectionState::Closed;
        let mut effects = vec![Effect::Emit(ConnectionEvent::Close { code, reason })];
        if std::mem::take(&mut self.close_requested) {
            return effects;
        }

        self.attempt = self.attempt.saturating_add(1);
        log::info!(
            "reconnect attempt {} of {}",
            self.attempt,
            self.policy.max_attempts
        );
        if self.policy.allows(self.attempt) {
            let delay = self.policy.delay_for(self.attempt);
            self.retry_pending = true;
            effects.push(Effect::Emit(ConnectionEvent::Reconnecting {
                attempt: self.attempt,
                delay,
            }));
            effects.push(Effect::ScheduleRetry(delay));
        } else {
            log::error!(
                "max reconnect attempts ({}) reached; giving up",
                self.policy.max_attempts
            );
            self.state = ConnectionState::Disconnected;
            effects.push(Effect::Emit(ConnectionEvent::Error(
                ConnectionError::MaxAttemptsReached {
                    attempts: self.policy.max_attempts,
                },
            )));
            effects.push(Effect::Emit(ConnectionEvent::Disconnected));
        }
        effects
    }
}
