//! Message records and typed content parts.
//!
//! A message belongs to a conversation and carries a `parent_id` link to the
//! message it continues. Sibling messages (same parent) represent branches
//! created by edit or regenerate actions; nothing here is ever deleted when a
//! branch is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message. Tool output is folded into assistant messages as
/// content parts rather than stored under its own role.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Lifecycle of a tool invocation embedded in an assistant message.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    InputStreaming,
    InputAvailable,
    OutputAvailable,
    OutputError,
}

impl ToolState {
    /// Whether a result has already been attached to this invocation.
    pub fn has_output(self) -> bool {
        matches!(self, Self::OutputAvailable)
    }
}

/// One ordered part of a message's content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text content
    Text { text: String },

    /// Model reasoning surfaced alongside the answer
    Reasoning { text: String },

    /// A tool invocation and, once attached, its result
    Tool {
        tool_name: String,
        tool_call_id: String,
        state: ToolState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },
}

impl ContentPart {
    /// Create a text content part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a reasoning content part
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// Create a pending tool invocation part
    pub fn tool_call(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::Tool {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            state: ToolState::InputAvailable,
            input: Some(input),
            output: None,
            error_text: None,
        }
    }

    /// Get text content if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A stored message. `parent_id = None` marks a root of the conversation tree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub parts: Vec<ContentPart>,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// First text part, if any. Used for title derivation.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(ContentPart::as_text)
    }

    /// All text parts concatenated with newlines.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_part_serializes_with_type_tag() {
        let part = ContentPart::text("hello");
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn tool_part_round_trips_state() {
        let part = ContentPart::tool_call("web_search", "call_1", serde_json::json!({"q": "rust"}));
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("input-available"));

        let back: ContentPart = serde_json::from_str(&json).unwrap();
        match back {
            ContentPart::Tool { state, output, .. } => {
                assert_eq!(state, ToolState::InputAvailable);
                assert!(output.is_none());
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[test]
    fn first_text_skips_non_text_parts() {
        let message = Message {
            id: "m1".into(),
            conversation_id: "c1".into(),
            role: Role::Assistant,
            parts: vec![
                ContentPart::reasoning("thinking"),
                ContentPart::text("answer"),
            ],
            parent_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(message.first_text(), Some("answer"));
    }
}
