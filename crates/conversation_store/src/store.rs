//! SQLite persistence for conversations and their message trees.
//!
//! Branching model: every message carries a nullable `parent_id` into the
//! same table. Edit and regenerate actions insert new siblings; existing rows
//! are only ever rewritten to replace assistant content (progressive save) or
//! to attach a tool result to a pending tool part. The conversation row keeps
//! an `active_leaf_id` pointer marking the branch tip currently shown.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use chat_core::{
    ContentPart, Conversation, ConversationStatus, Message, ProviderPreferences, Role, ToolState,
    DEFAULT_TITLE,
};

use crate::error::{StoreError, StoreResult};

/// Parameters for creating a conversation. The id is caller-supplied so that
/// lazy creation on first message and explicit creation share one code path.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub id: String,
    pub title: Option<String>,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
}

/// Parameters for appending a user message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    /// Caller-supplied id (clients generate message ids); minted when absent.
    pub id: Option<String>,
    pub parts: Vec<ContentPart>,
    pub parent_id: Option<String>,
}

/// Partial conversation update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ConversationUpdate {
    pub title: Option<String>,
    pub model: Option<String>,
    pub provider_preferences: Option<ProviderPreferences>,
    pub pinned: Option<bool>,
}

impl ConversationUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.model.is_none()
            && self.provider_preferences.is_none()
            && self.pinned.is_none()
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn init(&self) -> StoreResult<()>;

    /// Explicit creation; fails with `AlreadyExists` on an id collision.
    async fn create_conversation(&self, new: NewConversation) -> StoreResult<Conversation>;

    /// Lazy creation: a single conflict-ignoring insert, safe under
    /// concurrent first messages for the same id. The flag is true for
    /// exactly one of any set of racing callers.
    async fn ensure_conversation(
        &self,
        new: NewConversation,
    ) -> StoreResult<(Conversation, bool)>;

    async fn get_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>>;

    /// All conversations, most recently touched first.
    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>>;

    async fn update_conversation(
        &self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> StoreResult<Conversation>;

    /// Deletes the conversation and, by cascade, every message it owns.
    async fn delete_conversation(&self, conversation_id: &str) -> StoreResult<()>;

    /// Appends a user message under `parent_id` and bumps the conversation's
    /// `updated_at`. A missing conversation is an error, never a no-op.
    async fn append_user_message(
        &self,
        conversation_id: &str,
        new_message: NewMessage,
    ) -> StoreResult<Message>;

    /// Inserts the assistant message, or replaces its content when the exact
    /// id already exists (progressive save across generation steps). Sibling
    /// assistant messages are never touched.
    async fn upsert_assistant_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        parts: Vec<ContentPart>,
        parent_id: Option<String>,
    ) -> StoreResult<Message>;

    /// Finds, scanning assistant messages most-recent-first, the first
    /// pending tool part with this call id, marks it output-available and
    /// stores the output. Returns whether any row was rewritten.
    async fn attach_tool_result(
        &self,
        conversation_id: &str,
        tool_call_id: &str,
        output: serde_json::Value,
    ) -> StoreResult<bool>;

    async fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> StoreResult<()>;

    /// Repoints the active leaf. The message must belong to the conversation.
    async fn set_active_leaf(&self, conversation_id: &str, message_id: &str) -> StoreResult<()>;

    /// Sets the title only while it still holds the placeholder value, so
    /// auto-titling fires exactly once. Returns whether the title changed.
    async fn set_title_if_placeholder(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<bool>;

    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<Message>>;

    /// Every message of the conversation in creation order, branches and all.
    async fn get_all_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>>;

    /// The root-to-leaf path for the recorded active leaf. With no leaf
    /// recorded this degrades to the full message list in creation order; a
    /// dangling parent reference ends the walk at the last resolvable node.
    async fn get_active_path(&self, conversation_id: &str) -> StoreResult<Vec<Message>>;

    /// Relocates the active leaf to the deepest descendant of `message_id`,
    /// descending into the most-recently-created child wherever the tree
    /// forks. Returns the new leaf id.
    async fn switch_branch(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<String>;

    /// Records the model/provider pair a new conversation started with.
    async fn record_last_used(&self, model: &str, provider: &str) -> StoreResult<()>;

    /// The default model from settings, if one has been stored.
    async fn default_model(&self) -> StoreResult<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    db_path: PathBuf,
}

impl SqliteConversationStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    async fn with_connection<T, F>(&self, func: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&db_path)?;
            func(&mut connection)
        })
        .await
        .map_err(|error| StoreError::Task(error.to_string()))?
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn init(&self) -> StoreResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL DEFAULT 'New Conversation',
                    model TEXT,
                    provider_preferences TEXT,
                    status TEXT NOT NULL DEFAULT 'idle',
                    pinned INTEGER NOT NULL DEFAULT 0,
                    active_leaf_id TEXT REFERENCES messages(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    parent_id TEXT REFERENCES messages(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
                CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    async fn create_conversation(&self, new: NewConversation) -> StoreResult<Conversation> {
        self.with_connection(move |connection| {
            let inserted = insert_conversation(connection, &new)?;
            if !inserted {
                return Err(StoreError::AlreadyExists(new.id));
            }
            load_conversation(connection, &new.id)?
                .ok_or_else(|| StoreError::ConversationNotFound(new.id))
        })
        .await
    }

    async fn ensure_conversation(
        &self,
        new: NewConversation,
    ) -> StoreResult<(Conversation, bool)> {
        self.with_connection(move |connection| {
            let is_new = insert_conversation(connection, &new)?;
            let conversation = load_conversation(connection, &new.id)?
                .ok_or_else(|| StoreError::ConversationNotFound(new.id))?;
            Ok((conversation, is_new))
        })
        .await
    }

    async fn get_conversation(&self, conversation_id: &str) -> StoreResult<Option<Conversation>> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| load_conversation(connection, &conversation_id))
            .await
    }

    async fn list_conversations(&self) -> StoreResult<Vec<Conversation>> {
        self.with_connection(|connection| {
            let mut stmt = connection.prepare(
                "SELECT id, title, model, provider_preferences, status, pinned, active_leaf_id, created_at, updated_at
                 FROM conversations
                 ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut conversations = Vec::new();
            while let Some(row) = rows.next()? {
                conversations.push(row_to_conversation(row)?);
            }
            Ok(conversations)
        })
        .await
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> StoreResult<Conversation> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let mut assignments = Vec::new();
            let mut values: Vec<String> = Vec::new();

            if let Some(title) = update.title {
                assignments.push("title = ?");
                values.push(title);
            }
            if let Some(model) = update.model {
                assignments.push("model = ?");
                values.push(model);
            }
            if let Some(preferences) = update.provider_preferences {
                assignments.push("provider_preferences = ?");
                values.push(serde_json::to_string(&preferences)?);
            }
            if let Some(pinned) = update.pinned {
                assignments.push("pinned = ?");
                values.push(if pinned { "1".into() } else { "0".into() });
            }

            assignments.push("updated_at = ?");
            values.push(format_timestamp(Utc::now()));
            values.push(conversation_id.clone());

            let sql = format!(
                "UPDATE conversations SET {} WHERE id = ?",
                assignments.join(", ")
            );
            let affected =
                connection.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
            if affected == 0 {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }

            load_conversation(connection, &conversation_id)?
                .ok_or(StoreError::ConversationNotFound(conversation_id))
        })
        .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> StoreResult<()> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let affected = connection.execute(
                "DELETE FROM conversations WHERE id = ?1",
                params![conversation_id],
            )?;
            if affected == 0 {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }
            Ok(())
        })
        .await
    }

    async fn append_user_message(
        &self,
        conversation_id: &str,
        new_message: NewMessage,
    ) -> StoreResult<Message> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;

            ensure_conversation_exists(&tx, &conversation_id)?;
            if let Some(parent_id) = new_message.parent_id.as_deref() {
                ensure_message_in_conversation(&tx, &conversation_id, parent_id)?;
            }

            let message_id = new_message
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let now = format_timestamp(Utc::now());
            let content = serde_json::to_string(&new_message.parts)?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    message_id,
                    conversation_id,
                    Role::User.as_str(),
                    content,
                    new_message.parent_id,
                    now,
                ],
            )?;
            touch_conversation(&tx, &conversation_id, &now)?;

            let message = load_message(&tx, &conversation_id, &message_id)?
                .ok_or(StoreError::MessageNotFound(message_id))?;
            tx.commit()?;

            tracing::debug!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                parent_id = ?message.parent_id,
                "user message appended"
            );
            Ok(message)
        })
        .await
    }

    async fn upsert_assistant_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        parts: Vec<ContentPart>,
        parent_id: Option<String>,
    ) -> StoreResult<Message> {
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        self.with_connection(move |connection| {
            let tx = connection.transaction()?;

            ensure_conversation_exists(&tx, &conversation_id)?;
            if let Some(parent) = parent_id.as_deref() {
                ensure_message_in_conversation(&tx, &conversation_id, parent)?;
            }

            let now = format_timestamp(Utc::now());
            let content = serde_json::to_string(&parts)?;

            // Keyed strictly on the id: a conflict replaces content in place
            // and leaves parentage and siblings alone. The conversation guard
            // prevents an id collision from hijacking another conversation's
            // row.
            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     content = excluded.content,
                     updated_at = excluded.updated_at
                 WHERE messages.conversation_id = excluded.conversation_id",
                params![
                    message_id,
                    conversation_id,
                    Role::Assistant.as_str(),
                    content,
                    parent_id,
                    now,
                ],
            )?;
            touch_conversation(&tx, &conversation_id, &now)?;

            let message = load_message(&tx, &conversation_id, &message_id)?
                .ok_or(StoreError::MessageNotFound(message_id))?;
            tx.commit()?;
            Ok(message)
        })
        .await
    }

    async fn attach_tool_result(
        &self,
        conversation_id: &str,
        tool_call_id: &str,
        output: serde_json::Value,
    ) -> StoreResult<bool> {
        let conversation_id = conversation_id.to_string();
        let tool_call_id = tool_call_id.to_string();
        self.with_connection(move |connection| {
            ensure_conversation_exists(connection, &conversation_id)?;

            let candidates: Vec<(String, String)> = {
                let mut stmt = connection.prepare(
                    "SELECT id, content FROM messages
                     WHERE conversation_id = ?1 AND role = 'assistant'
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt.query_map(params![conversation_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };

            for (message_id, content) in candidates {
                let mut parts: Vec<ContentPart> = match serde_json::from_str(&content) {
                    Ok(parts) => parts,
                    Err(error) => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            message_id = %message_id,
                            error = %error,
                            "skipping assistant message with unparseable content"
                        );
                        continue;
                    }
                };

                let pending = parts.iter_mut().find_map(|part| match part {
                    ContentPart::Tool {
                        tool_call_id: id,
                        state,
                        output: slot,
                        ..
                    } if *id == tool_call_id && !state.has_output() => Some((state, slot)),
                    _ => None,
                });

                if let Some((state, slot)) = pending {
                    *state = ToolState::OutputAvailable;
                    *slot = Some(output);

                    connection.execute(
                        "UPDATE messages SET content = ?1, updated_at = ?2 WHERE id = ?3",
                        params![
                            serde_json::to_string(&parts)?,
                            format_timestamp(Utc::now()),
                            message_id,
                        ],
                    )?;
                    return Ok(true);
                }
            }

            Ok(false)
        })
        .await
    }

    async fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> StoreResult<()> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let affected = connection.execute(
                "UPDATE conversations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    status.as_str(),
                    format_timestamp(Utc::now()),
                    conversation_id
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }
            Ok(())
        })
        .await
    }

    async fn set_active_leaf(&self, conversation_id: &str, message_id: &str) -> StoreResult<()> {
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        self.with_connection(move |connection| {
            ensure_message_in_conversation(connection, &conversation_id, &message_id)?;
            let affected = connection.execute(
                "UPDATE conversations SET active_leaf_id = ?1 WHERE id = ?2",
                params![message_id, conversation_id],
            )?;
            if affected == 0 {
                return Err(StoreError::ConversationNotFound(conversation_id));
            }
            Ok(())
        })
        .await
    }

    async fn set_title_if_placeholder(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> StoreResult<bool> {
        let conversation_id = conversation_id.to_string();
        let title = title.to_string();
        self.with_connection(move |connection| {
            ensure_conversation_exists(connection, &conversation_id)?;
            let affected = connection.execute(
                "UPDATE conversations SET title = ?1 WHERE id = ?2 AND title = ?3",
                params![title, conversation_id, DEFAULT_TITLE],
            )?;
            Ok(affected > 0)
        })
        .await
    }

    async fn get_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<Option<Message>> {
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        self.with_connection(move |connection| {
            load_message(connection, &conversation_id, &message_id)
        })
        .await
    }

    async fn get_all_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            ensure_conversation_exists(connection, &conversation_id)?;
            load_all_messages(connection, &conversation_id)
        })
        .await
    }

    async fn get_active_path(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        self.with_connection(move |connection| {
            let conversation = load_conversation(connection, &conversation_id)?
                .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))?;

            let Some(leaf_id) = conversation.active_leaf_id else {
                // Conversations that predate branching, or that never had an
                // explicit branch selection, fall back to the linear view.
                return load_all_messages(connection, &conversation_id);
            };

            collect_path_to_root(connection, &conversation_id, &leaf_id)
        })
        .await
    }

    async fn switch_branch(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> StoreResult<String> {
        let conversation_id = conversation_id.to_string();
        let message_id = message_id.to_string();
        self.with_connection(move |connection| {
            ensure_message_in_conversation(connection, &conversation_id, &message_id)?;

            let leaf_id = resolve_branch_leaf(connection, &message_id)?;
            connection.execute(
                "UPDATE conversations SET active_leaf_id = ?1 WHERE id = ?2",
                params![leaf_id, conversation_id],
            )?;

            tracing::debug!(
                conversation_id = %conversation_id,
                from = %message_id,
                leaf = %leaf_id,
                "active branch switched"
            );
            Ok(leaf_id)
        })
        .await
    }

    async fn record_last_used(&self, model: &str, provider: &str) -> StoreResult<()> {
        let value = serde_json::json!({ "model": model, "provider": provider }).to_string();
        self.with_connection(move |connection| {
            connection.execute(
                "INSERT INTO settings (key, value, updated_at)
                 VALUES ('lastUsed', ?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![value, format_timestamp(Utc::now())],
            )?;
            Ok(())
        })
        .await
    }

    async fn default_model(&self) -> StoreResult<Option<String>> {
        self.with_connection(|connection| {
            let raw: Option<String> = connection
                .query_row(
                    "SELECT value FROM settings WHERE key = 'model'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(raw.map(|value| serde_json::from_str::<String>(&value).unwrap_or(value)))
        })
        .await
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        "#,
    )?;
    Ok(connection)
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339()
}

fn parse_timestamp(raw: String) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

/// Single conflict-ignoring insert; the check-and-create is one statement so
/// racing callers cannot both observe "new". Returns whether the row was
/// inserted by this call.
fn insert_conversation(connection: &Connection, new: &NewConversation) -> StoreResult<bool> {
    let now = format_timestamp(Utc::now());
    let preferences = new
        .provider_preferences
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let affected = connection.execute(
        "INSERT INTO conversations (id, title, model, provider_preferences, status, pinned, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'idle', 0, ?5, ?5)
         ON CONFLICT(id) DO NOTHING",
        params![
            new.id,
            new.title.as_deref().unwrap_or(DEFAULT_TITLE),
            new.model,
            preferences,
            now,
        ],
    )?;
    Ok(affected > 0)
}

fn ensure_conversation_exists(connection: &Connection, conversation_id: &str) -> StoreResult<()> {
    let exists: Option<i64> = connection
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::ConversationNotFound(conversation_id.to_string()));
    }
    Ok(())
}

fn ensure_message_in_conversation(
    connection: &Connection,
    conversation_id: &str,
    message_id: &str,
) -> StoreResult<()> {
    let owner: Option<String> = connection
        .query_row(
            "SELECT conversation_id FROM messages WHERE id = ?1",
            params![message_id],
            |row| row.get(0),
        )
        .optional()?;
    match owner {
        Some(owner) if owner == conversation_id => Ok(()),
        _ => Err(StoreError::MessageNotFound(message_id.to_string())),
    }
}

fn touch_conversation(
    connection: &Connection,
    conversation_id: &str,
    now: &str,
) -> StoreResult<()> {
    connection.execute(
        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
        params![now, conversation_id],
    )?;
    Ok(())
}

fn load_conversation(
    connection: &Connection,
    conversation_id: &str,
) -> StoreResult<Option<Conversation>> {
    let mut stmt = connection.prepare(
        "SELECT id, title, model, provider_preferences, status, pinned, active_leaf_id, created_at, updated_at
         FROM conversations
         WHERE id = ?1",
    )?;
    let mut rows = stmt.query(params![conversation_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_conversation(row)?)),
        None => Ok(None),
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> StoreResult<Conversation> {
    let status_raw: String = row.get(4)?;
    let status = ConversationStatus::from_db(&status_raw).ok_or_else(|| {
        StoreError::InvalidData(format!("unknown conversation status: {}", status_raw))
    })?;
    let preferences: Option<ProviderPreferences> = row
        .get::<_, Option<String>>(3)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;

    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        provider_preferences: preferences,
        status,
        pinned: row.get::<_, i64>(5)? != 0,
        active_leaf_id: row.get(6)?,
        created_at: parse_timestamp(row.get::<_, String>(7)?)?,
        updated_at: parse_timestamp(row.get::<_, String>(8)?)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, parent_id, created_at, updated_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> StoreResult<Message> {
    let role_raw: String = row.get(2)?;
    let role = Role::from_db(&role_raw)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown message role: {}", role_raw)))?;
    let parts: Vec<ContentPart> = serde_json::from_str(&row.get::<_, String>(3)?)?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        parts,
        parent_id: row.get(4)?,
        created_at: parse_timestamp(row.get::<_, String>(5)?)?,
        updated_at: parse_timestamp(row.get::<_, String>(6)?)?,
    })
}

fn load_message(
    connection: &Connection,
    conversation_id: &str,
    message_id: &str,
) -> StoreResult<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1 AND conversation_id = ?2"
    );
    let mut stmt = connection.prepare(&sql)?;
    let mut rows = stmt.query(params![message_id, conversation_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_message(row)?)),
        None => Ok(None),
    }
}

fn load_all_messages(connection: &Connection, conversation_id: &str) -> StoreResult<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = connection.prepare(&sql)?;
    let mut rows = stmt.query(params![conversation_id])?;
    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        messages.push(row_to_message(row)?);
    }
    Ok(messages)
}

/// Walks parent links from `leaf_id` up to a root and returns the messages in
/// root-to-leaf order. A dangling reference ends the walk early rather than
/// failing the read; the rows that did resolve are still shown.
fn collect_path_to_root(
    connection: &Connection,
    conversation_id: &str,
    leaf_id: &str,
) -> StoreResult<Vec<Message>> {
    let mut path = Vec::new();
    let mut visited = HashSet::new();
    let mut current = Some(leaf_id.to_string());

    while let Some(message_id) = current {
        if !visited.insert(message_id.clone()) {
            tracing::warn!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "parent cycle detected while resolving active path"
            );
            break;
        }
        match load_message(connection, conversation_id, &message_id)? {
            Some(message) => {
                current = message.parent_id.clone();
                path.push(message);
            }
            None => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    message_id = %message_id,
                    "dangling parent reference while resolving active path"
                );
                break;
            }
        }
    }

    path.reverse();
    Ok(path)
}

/// Depth-first descent from `message_id`: wherever a node has several
/// children, follow the most-recently-created one, so a switch lands on the
/// continuation the user created last. A childless node is its own leaf.
fn resolve_branch_leaf(connection: &Connection, message_id: &str) -> StoreResult<String> {
    let mut leaf_id = message_id.to_string();
    loop {
        let child: Option<String> = connection
            .query_row(
                "SELECT id FROM messages WHERE parent_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![leaf_id],
                |row| row.get(0),
            )
            .optional()?;
        match child {
            Some(child_id) => leaf_id = child_id,
            None => return Ok(leaf_id),
        }
    }
}
