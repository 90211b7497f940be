//! Conversation coordinator: ties the connection manager to the turn list and the display.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::conversation::{Conversation, Resolution};
use super::status::{ConnectionStatus, StatusLine};
use super::turn::Turn;
use crate::connection::{
    ConnectionEvent, ConnectionManager, EventKind, RequestSink, SendError, Subscription,
};
use crate::protocol::{ArtifactPayload, InboundEnvelope};

/// Display-side collaborator. Calls arrive on the connection driver task (inbound
/// traffic, lifecycle) or on the caller's task (`submit`, `open_artifact`).
pub trait DisplaySurface: Send + Sync {
    /// A turn was added, removed or given an artifact link. `turns` is the full snapshot.
    fn turns_changed(&self, _turns: &[Turn]) {}
    fn artifact_selected(&self, payload: &ArtifactPayload);
    fn artifact_cleared(&self);
    fn status_changed(&self, _status: &ConnectionStatus) {}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("query not sent: {0}")]
    NotSent(#[from] SendError),
}

struct State {
    conversation: Conversation,
    status: StatusLine,
}

struct Shared {
    state: Mutex<State>,
    sink: Arc<dyn RequestSink>,
    surface: Arc<dyn DisplaySurface>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_envelope(&self, envelope: &InboundEnvelope) {
        let (applied, snapshot) = {
            let mut state = self.lock();
            let applied = state.conversation.apply(envelope);
            let snapshot = applied
                .changed_turns()
                .then(|| state.conversation.turns().to_vec());
            (applied, snapshot)
        };

        if let Resolution::Mismatched { awaited, received } = &applied.resolution {
            log::warn!(
                "reply for query {:?} arrived while awaiting {}; dropped stale typing indicator",
                received,
                awaited
            );
        }
        if applied.appended.is_none() && envelope.chat_message.is_some() {
            log::warn!("inbound chat_message missing sender or text: {:?}", envelope);
        }
        if let Some(turns) = snapshot {
            self.surface.turns_changed(&turns);
        }
        if applied.clear_artifact {
            log::debug!("clearing displayed artifact");
            self.surface.artifact_cleared();
        }
    }

    fn handle_event(&self, event: &ConnectionEvent) {
        let changed = {
            let mut state = self.lock();
            state
                .status
                .update(event, Instant::now())
                .then(|| state.status.status().clone())
        };
        if let ConnectionEvent::Error(e) = event {
            log::error!("connection error: {}", e);
        }
        if let Some(status) = changed {
            self.surface.status_changed(&status);
        }
    }
}

/// Owns the turn list and correlates replies with requests.
///
/// Dropping the coordinator (or calling `detach`) unregisters every handler it added
/// to the connection manager.
pub struct Coordinator {
    shared: Arc<Shared>,
    subscriptions: Vec<Subscription>,
}

impl Coordinator {
    /// A coordinator not yet wired to any connection; feed it with `handle_envelope`.
    pub fn new(sink: Arc<dyn RequestSink>, surface: Arc<dyn DisplaySurface>, banner: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    conversation: Conversation::new(),
                    status: StatusLine::new(banner),
                }),
                sink,
                surface,
            }),
            subscriptions: Vec::new(),
        }
    }

    /// Build a coordinator and subscribe it to `manager`'s message channel and lifecycle events.
    pub fn attach(manager: &ConnectionManager, surface: Arc<dyn DisplaySurface>, banner: Duration) -> Self {
        let mut coordinator = Self::new(Arc::new(manager.clone()), surface, banner);
        let shared = Arc::clone(&coordinator.shared);
        coordinator
            .subscriptions
            .push(manager.on_message(move |envelope| shared.handle_envelope(envelope)));
        for kind in EventKind::ALL {
            let shared = Arc::clone(&coordinator.shared);
            coordinator
                .subscriptions
                .push(manager.on(kind, move |event| shared.handle_event(event)));
        }
        coordinator
    }

    /// Send `text` as a new query. Blank text is rejected without touching the turn list.
    /// If the connection is not open the placeholder is dropped again and the user turn stays.
    pub fn submit(&self, text: &str, selected_tools: Vec<String>) -> Result<String, SubmitError> {
        let (request, snapshot) = {
            let mut state = self.shared.lock();
            let request = state
                .conversation
                .begin_query(text, selected_tools)
                .ok_or(SubmitError::EmptyQuery)?;
            (request, state.conversation.turns().to_vec())
        };
        self.shared.surface.turns_changed(&snapshot);

        if let Err(e) = self.shared.sink.send_request(&request) {
            let snapshot = {
                let mut state = self.shared.lock();
                state.conversation.abandon(&request.query_id);
                state.conversation.turns().to_vec()
            };
            self.shared.surface.turns_changed(&snapshot);
            return Err(SubmitError::NotSent(e));
        }
        log::info!("submitted query {}", request.query_id);
        Ok(request.query_id)
    }

    /// Apply one inbound envelope; `attach` routes the message channel here.
    pub fn handle_envelope(&self, envelope: &InboundEnvelope) {
        self.shared.handle_envelope(envelope);
    }

    pub fn handle_event(&self, event: &ConnectionEvent) {
        self.shared.handle_event(event);
    }

    /// Show the artifact linked from turn `turn_id`. Read-only; false if there is none.
    pub fn open_artifact(&self, turn_id: &str) -> bool {
        let payload = self.shared.lock().conversation.artifact(turn_id).cloned();
        match payload {
            Some(payload) => {
                self.shared.surface.artifact_selected(&payload);
                true
            }
            None => false,
        }
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.shared.lock().conversation.turns().to_vec()
    }

    pub fn awaiting(&self) -> Option<String> {
        self.shared.lock().conversation.awaiting().map(str::to_string)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status.status().clone()
    }

    /// Status text to display now, `None` while the connected banner is hidden.
    pub fn status_text(&self) -> Option<String> {
        self.shared.lock().status.visible(Instant::now())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Unregister every handler added by `attach`.
    pub fn detach(mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::protocol::{decode_envelope, ArtifactField, Cell, ChatPayload, OutgoingRequest};

    #[derive(Default)]
    struct RecordingSink {
        open: bool,
        sent: Mutex<Vec<OutgoingRequest>>,
    }

    impl RequestSink for RecordingSink {
        fn send_request(&self, request: &OutgoingRequest) -> Result<(), SendError> {
            if !self.open {
                return Err(SendError::NotOpen(ConnectionState::Closed));
            }
            self.sent.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        selected: Mutex<Vec<ArtifactPayload>>,
        cleared: Mutex<usize>,
        snapshots: Mutex<usize>,
        statuses: Mutex<Vec<ConnectionStatus>>,
    }

    impl DisplaySurface for RecordingSurface {
        fn turns_changed(&self, _turns: &[Turn]) {
            *self.snapshots.lock().unwrap() += 1;
        }
        fn artifact_selected(&self, payload: &ArtifactPayload) {
            self.selected.lock().unwrap().push(payload.clone());
        }
        fn artifact_cleared(&self) {
            *self.cleared.lock().unwrap() += 1;
        }
        fn status_changed(&self, status: &ConnectionStatus) {
            self.statuses.lock().unwrap().push(status.clone());
        }
    }

    fn setup(open: bool) -> (Coordinator, Arc<RecordingSink>, Arc<RecordingSurface>) {
        let sink = Arc::new(RecordingSink {
            open,
            ..Default::default()
        });
        let surface = Arc::new(RecordingSurface::default());
        let c = Coordinator::new(sink.clone(), surface.clone(), Duration::from_secs(3));
        (c, sink, surface)
    }

    #[test]
    fn blank_submit_sends_nothing() {
        let (c, sink, surface) = setup(true);
        assert_eq!(c.submit("", vec![]), Err(SubmitError::EmptyQuery));
        assert_eq!(c.submit("   ", vec![]), Err(SubmitError::EmptyQuery));
        assert!(c.turns().is_empty());
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(*surface.snapshots.lock().unwrap(), 0);
    }

    #[test]
    fn submit_forwards_request_with_correlation_id() {
        let (c, sink, _) = setup(true);
        let id = c.submit("show me a table", vec!["tools.data".into()]).unwrap();
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].query_id, id);
        assert_eq!(sent[0].query, "show me a table");
        assert_eq!(sent[0].selected_tools, vec!["tools.data".to_string()]);
        assert_eq!(c.awaiting(), Some(id.clone()));
        let turns = c.turns();
        assert!(turns.last().unwrap().is_placeholder);
        assert_eq!(turns.last().unwrap().id, id);
    }

    #[test]
    fn submit_while_closed_leaves_no_typing_indicator() {
        let (c, _, _) = setup(false);
        let err = c.submit("hello?", vec![]).unwrap_err();
        assert_eq!(
            err,
            SubmitError::NotSent(SendError::NotOpen(ConnectionState::Closed))
        );
        let turns = c.turns();
        assert_eq!(turns.len(), 1);
        assert!(!turns[0].is_placeholder);
        assert!(c.awaiting().is_none());
    }

    #[test]
    fn explicit_null_clears_display() {
        let (c, _, surface) = setup(true);
        c.handle_envelope(&decode_envelope(r#"{"query_id":"zzz","artifact_data":null}"#).unwrap());
        assert_eq!(*surface.cleared.lock().unwrap(), 1);

        c.handle_envelope(&decode_envelope(r#"{"query_id":"zzz"}"#).unwrap());
        assert_eq!(*surface.cleared.lock().unwrap(), 1);
    }

    #[test]
    fn table_round_trips_through_selection() {
        let (c, _, surface) = setup(true);
        let id = c.submit("table", vec![]).unwrap();
        let table = ArtifactPayload::Table {
            columns: vec!["A".into(), "B".into()],
            rows: vec![
                vec![Cell::Number(1u64.into()), Cell::Text("x".into())],
                vec![Cell::Number(2u64.into()), Cell::Text("y".into())],
            ],
        };
        c.handle_envelope(&InboundEnvelope {
            query_id: Some(id.clone()),
            chat_message: Some(ChatPayload {
                from: Some("agent".into()),
                text: Some("done".into()),
            }),
            artifact_data: ArtifactField::Set(table.clone()),
        });

        assert!(c.open_artifact(&id));
        assert_eq!(*surface.selected.lock().unwrap(), vec![table.clone()]);
        let json = serde_json::to_value(&surface.selected.lock().unwrap()[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type":"table","columns":["A","B"],"rows":[[1,"x"],[2,"y"]]})
        );
        // Opening is a read: turn list untouched.
        assert_eq!(c.turns().len(), 2);
    }

    #[test]
    fn open_artifact_without_link_is_false() {
        let (c, _, surface) = setup(true);
        assert!(!c.open_artifact("missing"));
        assert!(surface.selected.lock().unwrap().is_empty());
    }

    #[test]
    fn lifecycle_events_drive_status() {
        let (c, _, surface) = setup(true);
        c.handle_event(&ConnectionEvent::Connecting);
        c.handle_event(&ConnectionEvent::Open);
        c.handle_event(&ConnectionEvent::Open);
        assert_eq!(c.status(), ConnectionStatus::Connected);
        assert_eq!(c.status_text().as_deref(), Some("Connected"));
        assert_eq!(
            *surface.statuses.lock().unwrap(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
    }
}
