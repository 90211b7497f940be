//! Conversation turns as shown to the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ArtifactPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

impl Sender {
    /// Wire `from` value to sender; anything other than `"user"` is the agent.
    pub fn from_wire(from: &str) -> Self {
        if from == "user" {
            Sender::User
        } else {
            Sender::Agent
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Agent => "Agent",
        }
    }
}

/// Link from a turn to the artifact it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactLink {
    pub display_text: String,
    pub payload: ArtifactPayload,
}

impl ArtifactLink {
    pub fn new(payload: ArtifactPayload) -> Self {
        Self {
            display_text: payload.display_label(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_link: Option<ArtifactLink>,
    /// "Agent is typing" entry; removed once its query is answered or superseded.
    #[serde(default)]
    pub is_placeholder: bool,
    /// Correlation id of the request a user turn started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

impl Turn {
    pub fn user(text: impl Into<String>, query_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: Sender::User,
            text: text.into(),
            created_at: Utc::now(),
            artifact_link: None,
            is_placeholder: false,
            query_id: Some(query_id.into()),
        }
    }

    pub fn placeholder(query_id: impl Into<String>) -> Self {
        Self {
            id: query_id.into(),
            sender: Sender::Agent,
            text: String::new(),
            created_at: Utc::now(),
            artifact_link: None,
            is_placeholder: true,
            query_id: None,
        }
    }

    pub fn reply(id: impl Into<String>, sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            text: text.into(),
            created_at: Utc::now(),
            artifact_link: None,
            is_placeholder: false,
            query_id: None,
        }
    }
}
