use log::{ error, info, warn };
use serde::{ Deserialize, Serialize };
use std::error::Error;
use std::sync::Arc;

use crate::config::persona::Persona;
use crate::config::prompt::build_system_instruction;
use crate::llm::chat::{ new_client as new_chat_client, ChatClient, GenerateRequest, Turn };
use crate::llm::{ ChatError, LlmConfig };
use crate::models::chat::{ ChatMessage, Role };

/// Prior messages sent along with each new one.
pub const HISTORY_SIZE: usize = 4;

pub const CONFIG_ERROR_TEXT: &str =
    "⚠️ GEMINI_API_KEY is not configured. Set it in the environment or a .env file.";
pub const RATE_LIMIT_TEXT: &str =
    "⚠️ Too many requests right now. Please wait a moment and try again.";
pub const GENERIC_ERROR_TEXT: &str = "Something went wrong. Please try again later. 😅";
pub const EMPTY_REPLY_TEXT: &str = "Sorry, I can't answer right now. 😅";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    ConfigError,
    RateLimited,
    Failed,
}

/// Text that goes into the conversation, plus a flag telling whether it is an error notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    pub status: ReplyStatus,
}

impl Reply {
    fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), status: ReplyStatus::Ok }
    }

    pub fn is_error(&self) -> bool {
        self.status != ReplyStatus::Ok
    }
}

impl From<&ChatError> for Reply {
    fn from(err: &ChatError) -> Self {
        match err {
            ChatError::MissingApiKey =>
                Reply { content: CONFIG_ERROR_TEXT.to_string(), status: ReplyStatus::ConfigError },
            ChatError::RateLimited { .. } =>
                Reply { content: RATE_LIMIT_TEXT.to_string(), status: ReplyStatus::RateLimited },
            _ => Reply { content: GENERIC_ERROR_TEXT.to_string(), status: ReplyStatus::Failed },
        }
    }
}

/// Keeps the last `limit` answered messages, oldest first. Stopped placeholders are
/// skipped.
pub fn recent_turns(history: &[ChatMessage], limit: usize) -> Vec<Turn> {
    let kept: Vec<&ChatMessage> = history
        .iter()
        .filter(|msg| !msg.stopped)
        .collect();
    let start = kept.len().saturating_sub(limit);
    kept[start..]
        .iter()
        .map(|msg| Turn::new(msg.role, msg.content.clone()))
        .collect()
}

pub struct ChatAgent {
    chat_client: Arc<dyn ChatClient>,
    system_instruction: String,
    history_size: usize,
}

impl ChatAgent {
    pub fn new(
        config: &LlmConfig,
        persona: &Persona,
        history_size: usize
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let chat_client = new_chat_client(config)?;
        info!(
            "Chat client configured: Model={}, BaseURL={:?}, ApiKey={}",
            chat_client.get_model(),
            config.base_url.as_deref().unwrap_or("adapter default"),
            if config.api_key.as_deref().map_or(false, |k| !k.trim().is_empty()) {
                "set"
            } else {
                "missing"
            }
        );
        Ok(Self::with_client(chat_client, persona, history_size))
    }

    pub fn with_client(
        chat_client: Arc<dyn ChatClient>,
        persona: &Persona,
        history_size: usize
    ) -> Self {
        Self {
            chat_client,
            system_instruction: build_system_instruction(persona),
            history_size,
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn build_request(&self, history: &[ChatMessage], new_message: &str) -> GenerateRequest {
        let mut turns = recent_turns(history, self.history_size);
        turns.push(Turn::new(Role::User, new_message));
        GenerateRequest {
            turns,
            system_instruction: self.system_instruction.clone(),
        }
    }

    /// Asks the model for a reply to `new_message`. Never fails: errors come back as
    /// conversation text with a non-`Ok` status.
    pub async fn send_message(&self, history: &[ChatMessage], new_message: &str) -> Reply {
        let request = self.build_request(history, new_message);
        match self.chat_client.generate(&request).await {
            Ok(Some(text)) => Reply::ok(text),
            Ok(None) => {
                warn!("Model returned no text, using fallback reply");
                Reply::ok(EMPTY_REPLY_TEXT)
            }
            Err(e) => {
                error!("Completion failed: {}", e);
                Reply::from(&e)
            }
        }
    }
}
