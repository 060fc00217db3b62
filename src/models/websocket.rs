use serde::{ Serialize, Deserialize };

use crate::models::chat::ChatMessage;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "send")] Send {
        content: String,
    },
    #[serde(rename = "new_chat")]
    NewChat,
    #[serde(rename = "stop")]
    Stop,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "welcome")] Welcome {
        persona: String,
        greeting: Option<String>,
        suggestions: Vec<String>,
        avatar: Option<String>,
    },
    #[serde(rename = "snapshot")] Snapshot {
        messages: Vec<ChatMessage>,
        busy: bool,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}
