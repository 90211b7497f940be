//! Connection manager: one WebSocket, driven by a single event-loop task.
//!
//! Every state transition happens on the driver task, fed by caller commands, socket
//! callbacks and the reconnect timer. Callers only see events and `Result`s.

use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;

use super::events::{ConnectionEvent, EventBus, EventKind, Subscription};
use super::machine::{ConnectionMachine, ConnectionState, Effect, Input, ReconnectPolicy};
use crate::protocol::{decode_envelope, InboundEnvelope, OutgoingRequest};

/// Where to connect and how to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: String,
    pub policy: ReconnectPolicy,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Returned by `send` when nothing was transmitted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("cannot send message: connection is {0}")]
    NotOpen(ConnectionState),
    #[error("encoding outgoing message: {0}")]
    Encode(String),
}

/// Anything that can carry an outgoing request to the agent service.
pub trait RequestSink: Send + Sync {
    fn send_request(&self, request: &OutgoingRequest) -> Result<(), SendError>;
}

enum DriverMsg {
    Connect,
    Close,
    Shutdown,
    Socket { generation: u64, event: SocketEvent },
}

enum SocketEvent {
    Opened(mpsc::UnboundedSender<Message>),
    Frame(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

struct Shared {
    state: ConnectionState,
    writer: Option<mpsc::UnboundedSender<Message>>,
}

struct Inner {
    config: ConnectionConfig,
    bus: Arc<EventBus>,
    shared: Arc<Mutex<Shared>>,
    commands: mpsc::UnboundedSender<DriverMsg>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.commands.send(DriverMsg::Shutdown);
    }
}

/// Owns the socket lifecycle, reconnect policy and the event table.
///
/// Cloning yields another handle to the same connection; the driver stops when
/// `shutdown` is called or the last handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create the manager and spawn its driver task. Must be called inside a Tokio runtime.
    /// No socket is opened until `connect`.
    pub fn new(config: ConnectionConfig) -> Self {
        let bus = EventBus::new();
        let shared = Arc::new(Mutex::new(Shared {
            state: ConnectionState::Idle,
            writer: None,
        }));
        let (commands, rx) = mpsc::unbounded_channel();
        let driver = Driver {
            url: config.url.clone(),
            machine: ConnectionMachine::new(config.policy),
            bus: Arc::clone(&bus),
            shared: Arc::clone(&shared),
            commands: commands.clone(),
            generation: 0,
            writer: None,
            socket: None,
        };
        tokio::spawn(driver.run(rx));
        Self {
            inner: Arc::new(Inner {
                config,
                bus,
                shared,
                commands,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().state
    }

    /// Open the socket unless one is already connecting or open.
    pub fn connect(&self) {
        self.command(DriverMsg::Connect);
    }

    /// Gracefully close an open socket. The close is intentional, so no reconnect follows.
    pub fn close(&self) {
        self.command(DriverMsg::Close);
    }

    /// Stop for good: cancel any pending reconnect, close the socket, drop all handlers.
    pub fn shutdown(&self) {
        self.command(DriverMsg::Shutdown);
    }

    /// Serialize and transmit `request` if the connection is open. Never queues.
    pub fn send(&self, request: &OutgoingRequest) -> Result<(), SendError> {
        let (state, writer) = {
            let shared = self.shared();
            (shared.state, shared.writer.clone())
        };
        let Some(writer) = writer.filter(|_| state == ConnectionState::Open) else {
            log::error!("cannot send message: connection is {}", state);
            return Err(SendError::NotOpen(state));
        };
        let text = serde_json::to_string(request).map_err(|e| SendError::Encode(e.to_string()))?;
        writer.send(Message::Text(text)).map_err(|_| {
            log::error!("cannot send message: socket task has exited");
            SendError::NotOpen(ConnectionState::Closed)
        })?;
        log::debug!("sent query {}", request.query_id);
        Ok(())
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(kind, handler)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        self.inner.bus.on_message(handler)
    }

    /// Handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner.bus.handler_count(kind)
    }

    pub fn message_handler_count(&self) -> usize {
        self.inner.bus.message_handler_count()
    }

    fn command(&self, msg: DriverMsg) {
        if self.inner.commands.send(msg).is_err() {
            log::warn!("connection manager has shut down; command ignored");
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.inner.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RequestSink for ConnectionManager {
    fn send_request(&self, request: &OutgoingRequest) -> Result<(), SendError> {
        self.send(request)
    }
}

type RetryTimer = Option<Pin<Box<Sleep>>>;

enum Wake {
    Msg(Option<DriverMsg>),
    Retry,
}

struct Driver {
    url: String,
    machine: ConnectionMachine,
    bus: Arc<EventBus>,
    shared: Arc<Mutex<Shared>>,
    commands: mpsc::UnboundedSender<DriverMsg>,
    generation: u64,
    writer: Option<mpsc::UnboundedSender<Message>>,
    socket: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DriverMsg>) {
        let mut retry: RetryTimer = None;
        loop {
            let wake = tokio::select! {
                msg = rx.recv() => Wake::Msg(msg),
                () = wait_retry(&mut retry) => Wake::Retry,
            };
            match wake {
                Wake::Retry => {
                    retry = None;
                    self.apply(Input::RetryDue, &mut retry);
                }
                Wake::Msg(Some(DriverMsg::Connect)) => self.apply(Input::Connect, &mut retry),
                Wake::Msg(Some(DriverMsg::Close)) => self.apply(Input::CloseRequested, &mut retry),
                Wake::Msg(Some(DriverMsg::Socket { generation, event })) => {
                    self.on_socket(generation, event, &mut retry)
                }
                Wake::Msg(Some(DriverMsg::Shutdown)) | Wake::Msg(None) => {
                    self.apply(Input::Teardown, &mut retry);
                    break;
                }
            }
        }
        self.bus.clear();
        log::debug!("connection driver stopped");
    }

    fn on_socket(&mut self, generation: u64, event: SocketEvent, retry: &mut RetryTimer) {
        if generation != self.generation {
            log::debug!("ignoring event from stale socket {}", generation);
            return;
        }
        match event {
            SocketEvent::Opened(writer) => {
                log::info!("websocket connection opened: {}", self.url);
                self.writer = Some(writer);
                self.apply(Input::Opened, retry);
            }
            SocketEvent::Frame(text) => match decode_envelope(&text) {
                Ok(envelope) => self.bus.dispatch(&envelope),
                Err(e) => {
                    log::error!("error parsing inbound message: {}", e);
                    self.apply(Input::DecodeError(e.to_string()), retry);
                }
            },
            SocketEvent::Error(message) => {
                log::error!("websocket error: {}", message);
                self.apply(Input::TransportError(message), retry);
            }
            SocketEvent::Closed { code, reason } => {
                log::info!("websocket closed: code={:?} reason={:?}", code, reason);
                self.writer = None;
                self.socket = None;
                self.apply(Input::Closed { code, reason }, retry);
            }
        }
    }

    fn apply(&mut self, input: Input, retry: &mut RetryTimer) {
        let effects = self.machine.step(input);
        self.publish_state();
        for effect in effects {
            match effect {
                Effect::Emit(event) => self.bus.emit(&event),
                Effect::OpenSocket => self.open_socket(),
                Effect::CloseSocket => self.close_socket(),
                Effect::ScheduleRetry(delay) => {
                    log::info!("reconnecting in {}ms", delay.as_millis());
                    *retry = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Effect::CancelRetry => *retry = None,
            }
        }
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.state = state;
        shared.writer = match state {
            ConnectionState::Open => self.writer.clone(),
            _ => None,
        };
    }

    fn open_socket(&mut self) {
        self.generation += 1;
        log::info!("connecting to {}", self.url);
        let task = tokio::spawn(run_socket(
            self.url.clone(),
            self.generation,
            self.commands.clone(),
        ));
        if let Some(old) = self.socket.replace(task) {
            old.abort();
        }
    }

    fn close_socket(&mut self) {
        match &self.writer {
            Some(writer) => {
                let _ = writer.send(Message::Close(None));
            }
            None => {
                if let Some(task) = self.socket.take() {
                    task.abort();
                }
            }
        }
    }
}

async fn wait_retry(retry: &mut RetryTimer) {
    match retry.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Own one socket from connect to close, relaying everything to the driver.
async fn run_socket(url: String, generation: u64, commands: mpsc::UnboundedSender<DriverMsg>) {
    let report = |event: SocketEvent| {
        let _ = commands.send(DriverMsg::Socket { generation, event });
    };

    let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            report(SocketEvent::Error(e.to_string()));
            report(SocketEvent::Closed {
                code: None,
                reason: e.to_string(),
            });
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();
    let (writer, mut outbound) = mpsc::unbounded_channel::<Message>();
    report(SocketEvent::Opened(writer));

    let mut code = None;
    let mut reason = String::new();
    let mut saw_close = false;
    loop {
        tokio::select! {
            out = outbound.recv() => {
                let Some(msg) = out else {
                    let _ = sink.close().await;
                    break;
                };
                if let Err(e) = sink.send(msg).await {
                    if !saw_close {
                        report(SocketEvent::Error(e.to_string()));
                    }
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => report(SocketEvent::Frame(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    report(SocketEvent::Frame(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    saw_close = true;
                    if let Some(frame) = frame {
                        code = Some(u16::from(frame.code));
                        reason = frame.reason.into_owned();
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if !saw_close {
                        report(SocketEvent::Error(e.to_string()));
                    }
                    break;
                }
                None => break,
            }
        }
    }
    report(SocketEvent::Closed { code, reason });
}
