//! Data models for conversation context

use serde::{Deserialize, Serialize};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role, as counted by the tokenizer
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Optional participant name; replaces the role in the wire encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Field values carried by this message, in wire order
    pub fn field_values(&self) -> impl Iterator<Item = &str> {
        [Some(self.role.as_str()), Some(self.content.as_str()), self.name.as_deref()]
            .into_iter()
            .flatten()
    }
}

/// Ordered user/assistant turns following the fixed system message
///
/// The system message is not stored here; the owning session keeps it
/// separately so it can never be replaced or duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Copy of the current messages, safe to hand to concurrent replies
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    /// Commit a completed request/response pair
    pub fn push_turn(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.messages.push(Message::user(prompt));
        self.messages.push(Message::assistant(reply));
    }

    /// Remove and return the last two messages, if there are at least two
    pub fn pop_turn(&mut self) -> Option<(Message, Message)> {
        if self.messages.len() < 2 {
            return None;
        }
        let reply = self.messages.pop()?;
        let prompt = self.messages.pop()?;
        Some((prompt, reply))
    }

    /// Put back a pair previously removed with [`pop_turn`](Self::pop_turn)
    pub fn restore_turn(&mut self, prompt: Message, reply: Message) {
        self.messages.push(prompt);
        self.messages.push(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_name_is_serialized_when_present() {
        let msg = Message::user("hi").with_name("alice");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["name"], "alice");
    }

    #[test]
    fn test_field_values() {
        let msg = Message::user("hello");
        assert_eq!(msg.field_values().collect::<Vec<_>>(), vec!["user", "hello"]);

        let named = Message::user("hello").with_name("bob");
        assert_eq!(named.field_values().count(), 3);
    }

    #[test]
    fn test_push_and_pop_turn() {
        let mut history = ConversationHistory::new();
        history.push_user("seed");
        history.push_turn("question", "answer");
        assert_eq!(history.len(), 3);

        let (prompt, reply) = history.pop_turn().unwrap();
        assert_eq!(prompt, Message::user("question"));
        assert_eq!(reply, Message::assistant("answer"));
        assert_eq!(history.len(), 1);

        assert!(history.pop_turn().is_none());
        assert_eq!(history.len(), 1);
    }
}
