pub mod gemini;

use async_trait::async_trait;
use std::sync::Arc;

use self::gemini::GeminiChatClient;
use super::{ ChatError, LlmConfig };
use crate::models::chat::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self { role, text: text.into() }
    }
}

/// One completion call: conversation turns (oldest first, new user turn last) and the
/// system instruction steering the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub turns: Vec<Turn>,
    pub system_instruction: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Returns the generated text, or `None` when the provider answered without any.
    async fn generate(&self, request: &GenerateRequest) -> Result<Option<String>, ChatError>;

    fn get_model(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client = GeminiChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
