//! Agent service HTTP collaborators: tool list, model catalog, settings, document conversion.

mod client;
mod tools;

pub use client::{
    AgentApi, AgentSettings, ApiError, DocumentFormat, ModelPricing, ModelRecord, ModelsResponse,
    DEFAULT_API_BASE_URL,
};
pub use tools::tool_display_name;
