mod state;

pub use state::{ PendingReply, Session, STOPPED_TEXT };

use log::info;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{ watch, Mutex };

use crate::agent::{ ChatAgent, Reply };
use crate::models::chat::Conversation;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("a reply is still pending")]
    Busy,
}

/// Drives one chat session: owns its message log and publishes a snapshot after every
/// change. Cloning shares the session.
#[derive(Clone)]
pub struct SessionController {
    agent: Arc<ChatAgent>,
    state: Arc<Mutex<Session>>,
    updates: Arc<watch::Sender<Conversation>>,
}

impl SessionController {
    pub fn new(agent: Arc<ChatAgent>) -> Self {
        let (updates, _) = watch::channel(Conversation::default());
        Self {
            agent,
            state: Arc::new(Mutex::new(Session::new())),
            updates: Arc::new(updates),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.updates.subscribe()
    }

    pub async fn snapshot(&self) -> Conversation {
        self.state.lock().await.snapshot()
    }

    fn publish(&self, session: &Session) {
        self.updates.send_replace(session.snapshot());
    }

    /// Appends the user message and the placeholder without waiting for the model.
    pub async fn begin_send(&self, text: &str) -> Result<PendingReply, SessionError> {
        let mut session = self.state.lock().await;
        let pending = session.begin_send(text)?;
        self.publish(&session);
        Ok(pending)
    }

    /// Waits for the model and writes its reply into the placeholder. Returns `None`
    /// when the send was stopped or the session reset in the meantime.
    pub async fn complete(&self, pending: PendingReply) -> Option<Reply> {
        let reply = self.agent.send_message(&pending.history, &pending.content).await;

        let mut session = self.state.lock().await;
        if session.resolve(&pending, reply.content.clone()) {
            self.publish(&session);
            Some(reply)
        } else {
            info!("Discarding reply for abandoned message {}", pending.placeholder_id);
            None
        }
    }

    pub async fn send(&self, text: &str) -> Result<Option<Reply>, SessionError> {
        let pending = self.begin_send(text).await?;
        Ok(self.complete(pending).await)
    }

    pub async fn stop(&self) -> bool {
        let mut session = self.state.lock().await;
        let stopped = session.stop();
        if stopped {
            info!("Pending reply stopped");
            self.publish(&session);
        }
        stopped
    }

    pub async fn reset(&self) {
        let mut session = self.state.lock().await;
        session.reset();
        self.publish(&session);
    }
}
