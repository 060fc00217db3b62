use clap::Parser;
use std::fmt;
use std::str::FromStr;

use crate::llm::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Repl,
    Server,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseModeError {
    message: String,
}

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "repl" | "cli" => Ok(Mode::Repl),
            "server" | "ws" => Ok(Mode::Server),
            _ =>
                Err(ParseModeError {
                    message: format!("Invalid mode: '{}' (expected 'repl' or 'server')", s),
                }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Repl => f.write_str("repl"),
            Mode::Server => f.write_str("server"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// How to run: an interactive terminal chat (repl) or a WebSocket chat server (server)
    #[arg(long, env = "CHAT_MODE", default_value = "repl")]
    pub mode: Mode,

    // --- Chat LLM Provider Args ---
    /// API key for Google Gemini. Without it every reply is a configuration notice.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Model name for chat completion (e.g., gemini-2.0-flash)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Base URL for the Gemini API (defaults to https://generativelanguage.googleapis.com/v1beta)
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// Number of earlier messages sent with each new one.
    #[arg(long, env = "HISTORY_SIZE", default_value_t = crate::agent::HISTORY_SIZE)]
    pub history_size: usize,

    // --- Persona Args ---
    /// Path to the persona JSON file. The built-in persona is used when unset.
    #[arg(long, env = "PERSONA_PATH")]
    pub persona_path: Option<String>,

    /// Optional image URL used as the avatar. Fetched once, failures are ignored.
    #[arg(long, env = "AVATAR_URL")]
    pub avatar_url: Option<String>,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API. The API is not started when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS. Requires --tls-key.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS. Requires --tls-cert.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.gemini_api_key.clone().filter(|k| !k.trim().is_empty()),
            completion_model: self.chat_model.clone(),
            base_url: self.chat_base_url.clone(),
        }
    }
}
