//! Conversation turn types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Capitalised label used when rendering prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A single utterance in a session. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: MessageRole,

    pub content: String,

    /// Creation time in fractional Unix seconds
    pub timestamp: f64,

    /// Entities mentioned in this turn, in order of appearance
    #[serde(default)]
    pub entities: Vec<String>,
}

impl ConversationTurn {
    pub fn new(role: MessageRole, content: impl Into<String>, entities: Vec<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_secs(),
            entities,
        }
    }
}

/// Current time in fractional Unix seconds.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let role: MessageRole = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(role, MessageRole::User);
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("User".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_turn_defaults_entities() {
        let turn: ConversationTurn =
            serde_json::from_str(r#"{"role":"user","content":"hi","timestamp":1.5}"#).unwrap();
        assert!(turn.entities.is_empty());
        assert_eq!(turn.timestamp, 1.5);
    }

    #[test]
    fn test_turn_new_stamps_time() {
        let turn = ConversationTurn::new(MessageRole::User, "Cancel Netflix", vec!["Netflix".into()]);
        assert_eq!(turn.role, MessageRole::User);
        assert_eq!(turn.entities, vec!["Netflix".to_string()]);
        assert!(turn.timestamp > 0.0);
    }
}
