use uuid::Uuid;

use crate::models::chat::{ ChatMessage, Conversation };
use super::SessionError;

pub const STOPPED_TEXT: &str = "(response stopped)";

/// A send that has been accepted but not yet answered.
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub placeholder_id: Uuid,
    /// Messages as they stood before the user message was appended.
    pub history: Vec<ChatMessage>,
    pub content: String,
    epoch: u64,
}

/// Message log of one chat session.
///
/// Messages are only ever appended; the single exception is the pending model
/// placeholder, which is overwritten once, addressed by its id. `epoch` moves on every
/// stop or reset so that replies to abandoned sends can be recognised and dropped.
#[derive(Debug, Default)]
pub struct Session {
    messages: Vec<ChatMessage>,
    pending: Option<Uuid>,
    epoch: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn snapshot(&self) -> Conversation {
        Conversation {
            messages: self.messages.clone(),
            busy: self.is_busy(),
        }
    }

    /// Appends the user message and an empty model placeholder.
    pub fn begin_send(&mut self, text: &str) -> Result<PendingReply, SessionError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.is_busy() {
            return Err(SessionError::Busy);
        }

        let history = self.messages.clone();
        let placeholder = ChatMessage::model("");
        let placeholder_id = placeholder.id;

        self.messages.push(ChatMessage::user(content));
        self.messages.push(placeholder);
        self.pending = Some(placeholder_id);

        Ok(PendingReply {
            placeholder_id,
            history,
            content: content.to_string(),
            epoch: self.epoch,
        })
    }

    /// Fills the placeholder. Returns false when the send was abandoned meanwhile.
    pub fn resolve(&mut self, pending: &PendingReply, content: String) -> bool {
        if pending.epoch != self.epoch || self.pending != Some(pending.placeholder_id) {
            return false;
        }
        if !self.replace(pending.placeholder_id, content) {
            return false;
        }
        self.pending = None;
        true
    }

    /// Abandons the outstanding send, if any.
    pub fn stop(&mut self) -> bool {
        match self.pending.take() {
            Some(id) => {
                if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
                    msg.content = STOPPED_TEXT.to_string();
                    msg.stopped = true;
                }
                self.epoch += 1;
                true
            }
            None => false,
        }
    }

    pub fn reset(&mut self) {
        if self.pending.take().is_some() {
            self.epoch += 1;
        }
        self.messages.clear();
    }

    fn replace(&mut self, id: Uuid, content: String) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(msg) => {
                msg.content = content;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    #[test]
    fn hello_scenario() {
        let mut session = Session::new();
        let pending = session.begin_send("hello").unwrap();

        assert!(pending.history.is_empty());
        assert!(session.is_busy());
        let roles: Vec<Role> = session
            .messages()
            .iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Model]);
        assert_eq!(session.messages()[0].content, "hello");
        assert_eq!(session.messages()[1].content, "");

        assert!(session.resolve(&pending, "hi!".to_string()));
        assert!(!session.is_busy());
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, "hi!");
    }

    #[test]
    fn trims_and_rejects_empty_input() {
        let mut session = Session::new();
        assert_eq!(session.begin_send("   \n").unwrap_err(), SessionError::EmptyMessage);
        assert!(session.messages().is_empty());

        let pending = session.begin_send("  hey  ").unwrap();
        assert_eq!(pending.content, "hey");
        assert_eq!(session.messages()[0].content, "hey");
    }

    #[test]
    fn rejects_second_send_while_busy() {
        let mut session = Session::new();
        session.begin_send("one").unwrap();
        assert_eq!(session.begin_send("two").unwrap_err(), SessionError::Busy);
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn history_excludes_new_turn() {
        let mut session = Session::new();
        let first = session.begin_send("one").unwrap();
        session.resolve(&first, "reply one".into());

        let second = session.begin_send("two").unwrap();
        let texts: Vec<&str> = second.history
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(texts, vec!["one", "reply one"]);
    }

    #[test]
    fn stop_suppresses_late_reply() {
        let mut session = Session::new();
        let pending = session.begin_send("slow").unwrap();

        assert!(session.stop());
        assert!(!session.is_busy());
        assert_eq!(session.messages()[1].content, STOPPED_TEXT);

        assert!(!session.resolve(&pending, "late".into()));
        assert_eq!(session.messages()[1].content, STOPPED_TEXT);
        assert!(session.messages()[1].stopped);
        assert!(!session.stop());
    }

    #[test]
    fn late_reply_after_reset_and_new_send_is_dropped() {
        let mut session = Session::new();
        let stale = session.begin_send("first").unwrap();
        session.reset();
        let fresh = session.begin_send("second").unwrap();

        assert!(!session.resolve(&stale, "stale".into()));
        assert!(session.is_busy());
        assert!(session.resolve(&fresh, "fresh".into()));
        assert_eq!(session.messages()[1].content, "fresh");
    }

    #[test]
    fn reset_is_idempotent() {
        let mut session = Session::new();
        session.reset();
        assert_eq!(session.snapshot(), Conversation::default());

        let pending = session.begin_send("x").unwrap();
        session.resolve(&pending, "y".into());
        session.reset();
        session.reset();
        assert_eq!(session.snapshot(), Conversation::default());
    }
}
