//! HTTP client for the agent service's plain request/response endpoints
//! (`http://localhost:8888/api` by default). No retry, no correlation.

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8888/api";

#[derive(Clone)]
pub struct AgentApi {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("agent api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent api error: {0}")]
    Api(String),
}

/// One entry of the model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub pricing: ModelPricing,
    #[serde(default)]
    pub running: Option<bool>,
}

/// Prices per 1M tokens; the service sends numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<serde_json::Value>,
}

/// `GET /models`: catalog plus the current agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    #[serde(default)]
    pub agent_description: Option<String>,
    #[serde(default)]
    pub agent_skills: Option<Vec<String>>,
    #[serde(default)]
    pub tools_path: Option<String>,
    #[serde(default)]
    pub is_reset_tools: bool,
}

/// `POST /save-config` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    pub model_id: Option<String>,
    pub description: String,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentFormat::Pdf),
            "docx" => Ok(DocumentFormat::Docx),
            other => Err(format!("unsupported document format: {}", other)),
        }
    }
}

#[derive(Serialize)]
struct ConversionRequest<'a> {
    markdown: &'a str,
    format: DocumentFormat,
}

#[derive(Deserialize)]
struct ErrorDetail {
    detail: serde_json::Value,
}

impl AgentApi {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /tools: available agent tool module names.
    pub async fn list_tools(&self) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/tools", self.base_url);
        log::debug!("fetching agent tools from {}", url);
        let res = check(self.client.get(&url).send().await?).await?;
        Ok(res.json().await?)
    }

    /// GET /models: model catalog and current agent configuration.
    pub async fn list_models(&self) -> Result<ModelsResponse, ApiError> {
        let url = format!("{}/models", self.base_url);
        log::debug!("fetching models from {}", url);
        let res = check(self.client.get(&url).send().await?).await?;
        Ok(res.json().await?)
    }

    /// POST /save-config: persist agent model, description and skills.
    pub async fn save_config(&self, settings: &AgentSettings) -> Result<(), ApiError> {
        let url = format!("{}/save-config", self.base_url);
        log::debug!("saving configuration to {}", url);
        check(self.client.post(&url).json(settings).send().await?).await?;
        Ok(())
    }

    /// POST /convert-markdown: render markdown to a binary document.
    pub async fn convert_markdown(
        &self,
        markdown: &str,
        format: DocumentFormat,
    ) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/convert-markdown", self.base_url);
        log::debug!("requesting markdown conversion to {} from {}", format.extension(), url);
        let body = ConversionRequest { markdown, format };
        let res = check(self.client.post(&url).json(&body).send().await?).await?;
        Ok(res.bytes().await?.to_vec())
    }
}

/// Turn a non-2xx response into `ApiError::Api`, preferring the service's `detail` field.
async fn check(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Api(format!("{} {}", status, error_detail(&body))))
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorDetail>(body) {
        Ok(ErrorDetail {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorDetail { detail }) => detail.to_string(),
        Err(_) => body.trim().to_string(),
    }
}
