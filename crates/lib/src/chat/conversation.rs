//! Ordered turn list and request/reply correlation.
//!
//! Plain state with no I/O: the coordinator feeds it submissions and inbound
//! envelopes and acts on what `apply` reports.

use super::turn::{ArtifactLink, Sender, Turn};
use crate::protocol::{ArtifactField, ArtifactPayload, InboundEnvelope, OutgoingRequest};

/// What happened to the outstanding placeholder when an envelope arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No request was awaiting a reply.
    Idle,
    /// The envelope answered the awaited request.
    Matched,
    /// The envelope belongs to a different request; the stale placeholder was dropped.
    Mismatched { awaited: String, received: Option<String> },
}

/// Outcome of applying one inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub resolution: Resolution,
    /// Id of the turn appended for `chat_message`, if any.
    pub appended: Option<String>,
    /// Id of the existing turn whose artifact link was attached or replaced.
    pub linked: Option<String>,
    /// `artifact_data` was an explicit `null`.
    pub clear_artifact: bool,
}

impl Applied {
    pub fn changed_turns(&self) -> bool {
        self.resolution != Resolution::Idle || self.appended.is_some() || self.linked.is_some()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    awaiting: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Correlation id of the request whose reply is still outstanding.
    pub fn awaiting(&self) -> Option<&str> {
        self.awaiting.as_deref()
    }

    pub fn turn(&self, id: &str) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.id == id && !t.is_placeholder)
    }

    /// Artifact attached to turn `id`, if any.
    pub fn artifact(&self, id: &str) -> Option<&ArtifactPayload> {
        self.turn(id)
            .and_then(|t| t.artifact_link.as_ref())
            .map(|link| &link.payload)
    }

    /// Start a request: append the user turn and a placeholder keyed by a fresh
    /// correlation id. Returns `None` (and changes nothing) when `text` is blank.
    pub fn begin_query(&mut self, text: &str, selected_tools: Vec<String>) -> Option<OutgoingRequest> {
        let query = text.trim();
        if query.is_empty() {
            return None;
        }
        if let Some(stale) = self.awaiting.take() {
            log::warn!("query {} superseded before its reply arrived", stale);
            self.remove_placeholder(&stale);
        }
        let query_id = uuid::Uuid::new_v4().to_string();
        self.turns.push(Turn::user(query, query_id.clone()));
        self.turns.push(Turn::placeholder(query_id.clone()));
        self.awaiting = Some(query_id.clone());
        Some(OutgoingRequest {
            query: query.to_string(),
            query_id,
            selected_tools,
        })
    }

    /// Drop the placeholder for a request that never went out.
    pub fn abandon(&mut self, query_id: &str) {
        if self.awaiting.as_deref() == Some(query_id) {
            self.awaiting = None;
        }
        self.remove_placeholder(query_id);
    }

    pub fn apply(&mut self, envelope: &InboundEnvelope) -> Applied {
        let received = envelope.query_id.as_deref();
        let resolution = match self.awaiting.take() {
            None => Resolution::Idle,
            Some(awaited) => {
                self.remove_placeholder(&awaited);
                if received == Some(awaited.as_str()) {
                    Resolution::Matched
                } else {
                    Resolution::Mismatched {
                        awaited,
                        received: received.map(str::to_string),
                    }
                }
            }
        };

        let appended = envelope
            .chat_message
            .as_ref()
            .and_then(|m| m.renderable())
            .map(|(from, text)| {
                let id = received
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let mut turn = Turn::reply(id.clone(), Sender::from_wire(from), text);
                turn.artifact_link = envelope.artifact_data.payload().cloned().map(ArtifactLink::new);
                self.turns.push(turn);
                id
            });

        let mut linked = None;
        let mut clear_artifact = false;
        match &envelope.artifact_data {
            ArtifactField::Set(payload) => {
                if let Some(id) = received {
                    if let Some(turn) = self.turn_mut(id) {
                        turn.artifact_link = Some(ArtifactLink::new(payload.clone()));
                        linked = Some(id.to_string());
                    } else {
                        log::debug!("artifact for {} has no turn to attach to", id);
                    }
                }
            }
            ArtifactField::Clear => clear_artifact = true,
            ArtifactField::Unsupported(_) => {
                log::warn!("ignoring unsupported artifact_data for {:?}", received);
            }
            ArtifactField::Absent => {}
        }

        Applied {
            resolution,
            appended,
            linked,
            clear_artifact,
        }
    }

    fn turn_mut(&mut self, id: &str) -> Option<&mut Turn> {
        self.turns
            .iter_mut()
            .rev()
            .find(|t| t.id == id && !t.is_placeholder)
    }

    fn remove_placeholder(&mut self, query_id: &str) {
        self.turns.retain(|t| !(t.is_placeholder && t.id == query_id));
    }
}
