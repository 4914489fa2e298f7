//! Conversation records, status, and provider routing preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title assigned at creation until the first user message derives a real one.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Conversation lifecycle status, mutated only around a generation cycle.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Idle,
    Streaming,
    Error,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Error => "error",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(Self::Idle),
            "streaming" => Some(Self::Streaming),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// How requests for this conversation are routed to upstream providers.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    Auto,
    Specific,
}

/// Provider routing preferences recorded per conversation. Opaque to the
/// store; the generation collaborator interprets them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProviderPreferences {
    pub mode: RoutingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl ProviderPreferences {
    /// The provider label recorded as "last used": the explicit slug when
    /// routing is pinned, otherwise "auto".
    pub fn provider_label(&self) -> &str {
        match (self.mode, self.provider.as_deref()) {
            (RoutingMode::Specific, Some(slug)) => slug,
            _ => "auto",
        }
    }
}

/// A stored conversation. `active_leaf_id` is the tip of the branch the user
/// is currently looking at; the displayed path is derived by walking parent
/// links up from it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
    pub status: ConversationStatus,
    pub pinned: bool,
    pub active_leaf_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_placeholder_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

/// Sibling-group navigation info for one message, as consumed by branch
/// navigation UI ("< 2/3 >").
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SiblingInfo {
    pub total: usize,
    /// 1-based position of the message within its sibling group.
    pub current_index: usize,
    pub sibling_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_strings() {
        for status in [
            ConversationStatus::Idle,
            ConversationStatus::Streaming,
            ConversationStatus::Error,
        ] {
            assert_eq!(ConversationStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(ConversationStatus::from_db("bogus"), None);
    }

    #[test]
    fn provider_label_falls_back_to_auto() {
        let auto = ProviderPreferences {
            mode: RoutingMode::Auto,
            provider: Some("ignored".into()),
            sort: Some("price".into()),
        };
        assert_eq!(auto.provider_label(), "auto");

        let pinned = ProviderPreferences {
            mode: RoutingMode::Specific,
            provider: Some("deepinfra".into()),
            sort: None,
        };
        assert_eq!(pinned.provider_label(), "deepinfra");
    }
}
