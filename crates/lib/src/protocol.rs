//! Agent WebSocket wire types.
//!
//! Client → server: `{ "query", "query_id", "selected_tools" }`.
//! Server → client: `{ "query_id", "chat_message"?, "artifact_data"? }` where
//! `artifact_data` distinguishes a missing field from an explicit `null`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Outgoing query: one user request, correlated by `query_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingRequest {
    pub query: String,
    pub query_id: String,
    #[serde(default)]
    pub selected_tools: Vec<String>,
}

/// Inbound frame from the agent service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_message: Option<ChatPayload>,
    #[serde(default, skip_serializing_if = "ArtifactField::is_absent")]
    pub artifact_data: ArtifactField,
}

/// `chat_message` body. Both fields are optional on the wire; only a message with a
/// non-empty `from` and a present `text` becomes a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ChatPayload {
    /// Sender and text when the message is complete enough to render.
    pub fn renderable(&self) -> Option<(&str, &str)> {
        let from = self.from.as_deref().filter(|f| !f.is_empty())?;
        let text = self.text.as_deref()?;
        Some((from, text))
    }
}

/// State of the `artifact_data` field on an inbound envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ArtifactField {
    /// Field not present: no change to any artifact.
    #[default]
    Absent,
    /// Field present with value `null`: clear the displayed artifact.
    Clear,
    /// Field carries a recognised payload.
    Set(ArtifactPayload),
    /// Field carries something that is not a known artifact shape. Ignored.
    Unsupported(serde_json::Value),
}

impl ArtifactField {
    pub fn is_absent(&self) -> bool {
        matches!(self, ArtifactField::Absent)
    }

    pub fn payload(&self) -> Option<&ArtifactPayload> {
        match self {
            ArtifactField::Set(p) => Some(p),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ArtifactField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Only called when the key is present; a missing key falls back to `Default`.
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.is_null() {
            return Ok(ArtifactField::Clear);
        }
        match serde_json::from_value::<ArtifactPayload>(value.clone()) {
            Ok(payload) => Ok(ArtifactField::Set(payload)),
            Err(e) => {
                log::debug!("unsupported artifact_data: {}", e);
                Ok(ArtifactField::Unsupported(value))
            }
        }
    }
}

impl Serialize for ArtifactField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ArtifactField::Absent | ArtifactField::Clear => serializer.serialize_none(),
            ArtifactField::Set(p) => p.serialize(serializer),
            ArtifactField::Unsupported(v) => v.serialize(serializer),
        }
    }
}

/// Artifact returned by the agent, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArtifactPayload {
    Table {
        columns: Vec<String>,
        #[serde(default)]
        rows: Vec<Vec<Cell>>,
    },
    /// `content` is itself a JSON-encoded plot spec.
    Plotly { content: String },
    Markdown { content: String },
}

impl ArtifactPayload {
    /// Link text shown on the turn that carries this artifact.
    pub fn display_label(&self) -> String {
        match self {
            ArtifactPayload::Table { rows, .. } => format!("View Table ({} rows)", rows.len()),
            ArtifactPayload::Plotly { .. } => "View Plot".to_string(),
            ArtifactPayload::Markdown { .. } => "View Notes".to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactPayload::Table { .. } => "table",
            ArtifactPayload::Plotly { .. } => "plotly",
            ArtifactPayload::Markdown { .. } => "markdown",
        }
    }

    /// Decode the embedded plot spec of a `plotly` artifact.
    pub fn plot_spec(&self) -> Option<Result<serde_json::Value, serde_json::Error>> {
        match self {
            ArtifactPayload::Plotly { content } => Some(serde_json::from_str(content)),
            _ => None,
        }
    }
}

/// One scalar table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

/// Decode one text frame into an envelope.
pub fn decode_envelope(text: &str) -> Result<InboundEnvelope, serde_json::Error> {
    serde_json::from_str(text)
}
