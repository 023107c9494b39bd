//! Data model shared by the index, the session store and the context engine.

use parley_common::{ConversationTurn, MessageRole};
use serde::{Deserialize, Serialize};

/// Context assembled for one query. Built fresh per call, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Most recent turns of the current session, oldest first
    pub recent_turns: Vec<ConversationTurn>,

    /// Semantically similar turns from other sessions, best match first
    pub relevant_history: Vec<ConversationTurn>,

    /// Entities mentioned in `recent_turns`, ordered by last mention
    pub mentioned_entities: Vec<String>,

    /// The query with its first pronoun reference substituted
    pub resolved_query: String,
}

/// Payload of an indexed conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub user_id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: f64,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl ConversationPayload {
    pub fn to_turn(&self) -> ConversationTurn {
        ConversationTurn {
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp,
            entities: self.entities.clone(),
        }
    }
}

/// Payload of an indexed user note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotePayload {
    pub user_id: String,
    pub note_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: f64,
}

/// Typed payload, one variant per collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Conversation(ConversationPayload),
    Note(NotePayload),
}

impl RecordPayload {
    /// The tenant key every record must carry.
    pub fn user_id(&self) -> &str {
        match self {
            Self::Conversation(p) => &p.user_id,
            Self::Note(p) => &p.user_id,
        }
    }

    /// Text that keyword matching runs against.
    pub fn searchable_text(&self) -> String {
        match self {
            Self::Conversation(p) => p.content.clone(),
            Self::Note(p) => format!("{}\n{}\n{}", p.title, p.content, p.tags.join(" ")),
        }
    }

    pub fn as_conversation(&self) -> Option<&ConversationPayload> {
        match self {
            Self::Conversation(p) => Some(p),
            Self::Note(_) => None,
        }
    }

    pub fn as_note(&self) -> Option<&NotePayload> {
        match self {
            Self::Note(p) => Some(p),
            Self::Conversation(_) => None,
        }
    }
}

/// Outcome of appending a turn.
///
/// The turn is always stored in the session; `indexed` reports whether it
/// also reached the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReceipt {
    pub turn: ConversationTurn,
    pub indexed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A note to index. A missing `note_id` gets a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    #[serde(default)]
    pub note_id: Option<String>,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One ranked note-search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteHit {
    pub note_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: f64,
    pub score: f32,
}

impl NoteHit {
    pub fn from_payload(note: &NotePayload, score: f32) -> Self {
        Self {
            note_id: note.note_id.clone(),
            title: note.title.clone(),
            content: note.content.clone(),
            tags: note.tags.clone(),
            created_at: note.created_at,
            score,
        }
    }
}

/// A record stored in the vector index, uniquely identified by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: RecordPayload,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, payload: RecordPayload) -> Self {
        Self {
            id: id.into(),
            vector,
            payload,
        }
    }
}

/// One hit from a search call. Transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub payload: RecordPayload,
}

/// Value a payload field is matched against.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    /// Exact equality on a string field (or membership in a string array)
    Keyword(String),
    /// Substring match on a text field
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub value: Match,
}

impl FieldCondition {
    pub fn keyword(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: Match::Keyword(value.into()),
        }
    }

    pub fn text(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: Match::Text(value.into()),
        }
    }

    /// Whether a JSON payload satisfies this condition.
    pub fn matches(&self, payload: &serde_json::Map<String, serde_json::Value>) -> bool {
        use serde_json::Value;

        let Some(value) = payload.get(&self.field) else {
            return false;
        };

        match (&self.value, value) {
            (Match::Keyword(expected), Value::String(s)) => s == expected,
            (Match::Keyword(expected), Value::Array(items)) => items
                .iter()
                .any(|item| item.as_str() == Some(expected.as_str())),
            (Match::Text(needle), Value::String(s)) => s.contains(needle.as_str()),
            _ => false,
        }
    }
}

/// Conjunction of conditions that must hold and conditions that must not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl PayloadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, condition: FieldCondition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn must_not(mut self, condition: FieldCondition) -> Self {
        self.must_not.push(condition);
        self
    }

    /// Merge another filter's conditions into this one.
    pub fn and(mut self, other: PayloadFilter) -> Self {
        self.must.extend(other.must);
        self.must_not.extend(other.must_not);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    pub fn matches(&self, payload: &serde_json::Map<String, serde_json::Value>) -> bool {
        self.must.iter().all(|c| c.matches(payload))
            && !self.must_not.iter().any(|c| c.matches(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation() -> RecordPayload {
        RecordPayload::Conversation(ConversationPayload {
            user_id: "u1".into(),
            session_id: "s1".into(),
            role: MessageRole::User,
            content: "Cancel my Netflix".into(),
            timestamp: 10.0,
            entities: vec!["Netflix".into()],
        })
    }

    #[test]
    fn test_payload_is_tagged() {
        let value = serde_json::to_value(conversation()).unwrap();
        assert_eq!(value["kind"], "conversation");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["role"], "user");

        let back: RecordPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.user_id(), "u1");
        assert!(back.as_conversation().is_some());
    }

    #[test]
    fn test_note_searchable_text_includes_title_and_tags() {
        let note = RecordPayload::Note(NotePayload {
            user_id: "u1".into(),
            note_id: "n1".into(),
            title: "Budget".into(),
            content: "Spend less on streaming".into(),
            tags: vec!["finance".into()],
            created_at: 1.0,
        });
        let text = note.searchable_text();
        assert!(text.contains("Budget"));
        assert!(text.contains("finance"));
    }

    #[test]
    fn test_filter_matching() {
        let payload = json!({
            "user_id": "u1",
            "session_id": "s1",
            "content": "hello there",
            "tags": ["a", "b"]
        });
        let map = payload.as_object().unwrap();

        let filter = PayloadFilter::new()
            .must(FieldCondition::keyword("user_id", "u1"))
            .must(FieldCondition::keyword("tags", "b"))
            .must(FieldCondition::text("content", "lo th"));
        assert!(filter.matches(map));

        let excluded = filter.clone().must_not(FieldCondition::keyword("session_id", "s1"));
        assert!(!excluded.matches(map));

        let missing = PayloadFilter::new().must(FieldCondition::keyword("absent", "x"));
        assert!(!missing.matches(map));
    }
}
