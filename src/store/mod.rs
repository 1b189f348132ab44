//! Conversation persistence with SQLite
//!
//! - every message write checks that its parent is already persisted
//! - message batches and the path overwrite share one transaction
//! - children lists are rebuilt from `parent_id` in insertion order on load

mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::tree::{Message, MessageStore};

pub use schema::SCHEMA;

const LAST_CONVERSATION_KEY: &str = "last_conversation_id";

/// Persisted message set plus the active path
#[derive(Debug, Clone, Default)]
pub struct ConversationTree {
    pub messages: MessageStore,
    pub current_path: Vec<String>,
}

/// A conversation with its whole tree loaded
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: MessageStore,
    pub root_message_id: Option<String>,
    pub current_path: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The persistence contract the session writes through
pub trait ConversationRepository: Send + Sync {
    fn create_conversation(&self, id: &str, title: &str) -> Result<Conversation>;

    fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>>;

    /// Most recently updated first
    fn list_conversations(&self) -> Result<Vec<ConversationRow>>;

    /// Removes the conversation and every message it owns
    fn delete_conversation(&self, id: &str) -> Result<()>;

    fn load_conversation_tree(&self, id: &str) -> Result<ConversationTree>;

    /// Upsert `messages` (parents before children) and overwrite the path.
    /// Nothing is written unless every message and the path are accepted.
    fn upsert_messages(&self, id: &str, messages: &[Message], current_path: &[String]) -> Result<()>;

    fn update_title(&self, id: &str, title: &str) -> Result<()>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // CONVERSATIONS
    // ============================================

    /// Look up a conversation by exact id or unambiguous id prefix
    pub fn find_conversation(&self, query: &str) -> Result<Option<ConversationRow>> {
        if let Some(row) = self.get_conversation(query)? {
            return Ok(Some(row));
        }
        let matches: Vec<ConversationRow> = self
            .list_conversations()?
            .into_iter()
            .filter(|c| c.id.starts_with(query))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            n => Err(Error::Validation(format!(
                "'{}' matches {} conversations; use a longer prefix",
                query, n
            ))),
        }
    }

    pub fn load_conversation(&self, id: &str) -> Result<Conversation> {
        let row = self
            .get_conversation(id)?
            .ok_or_else(|| Error::conversation_not_found(id))?;
        let tree = self.load_conversation_tree(id)?;
        let root_message_id = tree.messages.root()?.map(String::from);
        Ok(Conversation {
            id: row.id,
            title: row.title,
            messages: tree.messages,
            root_message_id,
            current_path: tree.current_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    // ============================================
    // APP STATE
    // ============================================

    pub fn set_last_active(&self, conversation_id: Option<&str>) -> Result<()> {
        let conn = self.conn();
        match conversation_id {
            Some(id) => conn.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![LAST_CONVERSATION_KEY, id],
            )?,
            None => conn.execute(
                "DELETE FROM app_state WHERE key = ?",
                params![LAST_CONVERSATION_KEY],
            )?,
        };
        Ok(())
    }

    pub fn last_active(&self) -> Result<Option<String>> {
        let result = self.conn().query_row(
            "SELECT value FROM app_state WHERE key = ?",
            params![LAST_CONVERSATION_KEY],
            |row| row.get(0),
        );

        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The last used conversation if it still exists, else the most recently
    /// updated one
    pub fn resolve_active_conversation(&self) -> Result<Option<String>> {
        if let Some(id) = self.last_active()? {
            if self.get_conversation(&id)?.is_some() {
                return Ok(Some(id));
            }
        }
        Ok(self.list_conversations()?.into_iter().next().map(|c| c.id))
    }
}

impl ConversationRepository for SqliteStore {
    fn create_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        if id.trim().is_empty() || title.trim().is_empty() {
            return Err(Error::Validation(
                "conversation id and title are required".to_string(),
            ));
        }
        if self.get_conversation(id)?.is_some() {
            return Err(Error::Validation(format!("conversation {} already exists", id)));
        }

        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO conversations (id, title, current_path, created_at, updated_at)
             VALUES (?, ?, '[]', ?, ?)",
            params![id, title, format_ts(&now), format_ts(&now)],
        )?;
        tracing::debug!(conversation_id = %id, "conversation created");

        Ok(Conversation {
            id: id.to_string(),
            title: title.to_string(),
            messages: MessageStore::new(),
            root_message_id: None,
            current_path: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        let row = self.conn().query_row(
            r#"SELECT c.id, c.title, c.current_path, c.created_at, c.updated_at,
                      (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
               FROM conversations c
               WHERE c.id = ?"#,
            params![id],
            RawConversationRow::from_row,
        );

        match row {
            Ok(r) => Ok(Some(r.try_into()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_conversations(&self) -> Result<Vec<ConversationRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT c.id, c.title, c.current_path, c.created_at, c.updated_at,
                      (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
               FROM conversations c
               ORDER BY c.updated_at DESC, c.rowid DESC"#,
        )?;

        let rows = stmt
            .query_map([], RawConversationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ConversationRow::try_from).collect()
    }

    fn delete_conversation(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(Error::conversation_not_found(id));
        }
        conn.execute(
            "DELETE FROM app_state WHERE key = ?1 AND value = ?2",
            params![LAST_CONVERSATION_KEY, id],
        )?;
        tracing::info!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    fn load_conversation_tree(&self, id: &str) -> Result<ConversationTree> {
        let conn = self.conn();
        let path_json: String = match conn.query_row(
            "SELECT current_path FROM conversations WHERE id = ?",
            params![id],
            |row| row.get(0),
        ) {
            Ok(p) => p,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(Error::conversation_not_found(id))
            }
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            r#"SELECT id, conversation_id, parent_id, role, content, branch_index, timestamp
               FROM messages
               WHERE conversation_id = ?
               ORDER BY rowid"#,
        )?;
        let rows = stmt
            .query_map(params![id], RawMessageRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(ConversationTree {
            messages: MessageStore::from_messages(messages)?,
            current_path: serde_json::from_str(&path_json)?,
        })
    }

    fn upsert_messages(&self, id: &str, messages: &[Message], current_path: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM conversations WHERE id = ?",
            params![id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(Error::conversation_not_found(id));
        }

        for message in messages {
            write_message(&tx, id, message)?;
        }
        validate_path(&tx, id, current_path)?;

        tx.execute(
            "UPDATE conversations SET current_path = ?, updated_at = ? WHERE id = ?",
            params![
                serde_json::to_string(current_path)?,
                format_ts(&Utc::now()),
                id
            ],
        )?;
        tx.commit()?;

        tracing::debug!(
            conversation_id = %id,
            messages = messages.len(),
            path_len = current_path.len(),
            "conversation tree persisted"
        );
        Ok(())
    }

    fn update_title(&self, id: &str, title: &str) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ?",
            params![title, format_ts(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(Error::conversation_not_found(id));
        }
        Ok(())
    }
}

fn write_message(tx: &Transaction<'_>, conversation_id: &str, message: &Message) -> Result<()> {
    if message.id.trim().is_empty() {
        return Err(Error::Validation("message id is empty".to_string()));
    }
    if message.conversation_id != conversation_id {
        return Err(Error::Validation(format!(
            "message {} belongs to conversation {}, not {}",
            message.id, message.conversation_id, conversation_id
        )));
    }

    match &message.parent_id {
        Some(parent_id) => {
            let parent_conversation = match tx.query_row(
                "SELECT conversation_id FROM messages WHERE id = ?",
                params![parent_id],
                |row| row.get::<_, String>(0),
            ) {
                Ok(c) => c,
                Err(rusqlite::Error::QueryReturnedNoRows) => {
                    return Err(Error::Dependency {
                        conversation_id: conversation_id.to_string(),
                        missing_parent: parent_id.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            if parent_conversation != conversation_id {
                return Err(Error::Validation(format!(
                    "parent {} of message {} belongs to another conversation",
                    parent_id, message.id
                )));
            }
        }
        None => {
            let other_root: Option<String> = match tx.query_row(
                "SELECT id FROM messages
                 WHERE conversation_id = ?1 AND parent_id IS NULL AND id != ?2
                 LIMIT 1",
                params![conversation_id, message.id],
                |row| row.get(0),
            ) {
                Ok(r) => Some(r),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            };
            if let Some(root) = other_root {
                return Err(Error::Validation(format!(
                    "conversation {} already has root {}; message {} needs a parent",
                    conversation_id, root, message.id
                )));
            }
        }
    }

    let existing = match tx.query_row(
        "SELECT conversation_id, parent_id FROM messages WHERE id = ?",
        params![message.id],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
    ) {
        Ok(e) => Some(e),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(e.into()),
    };
    if let Some((existing_conversation, existing_parent)) = existing {
        if existing_conversation != conversation_id || existing_parent != message.parent_id {
            return Err(Error::Validation(format!(
                "message {} already exists with a different position in the tree",
                message.id
            )));
        }
    }

    tx.execute(
        r#"INSERT INTO messages
           (id, conversation_id, parent_id, role, content, branch_index, timestamp)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(id) DO UPDATE SET content = excluded.content"#,
        params![
            message.id,
            conversation_id,
            message.parent_id,
            message.role.as_str(),
            message.content,
            message.branch_index as i64,
            format_ts(&message.timestamp),
        ],
    )?;
    Ok(())
}

fn validate_path(tx: &Transaction<'_>, conversation_id: &str, path: &[String]) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }

    let mut stmt = tx.prepare("SELECT id, parent_id FROM messages WHERE conversation_id = ?")?;
    let parents: HashMap<String, Option<String>> = stmt
        .query_map(params![conversation_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    let mut expected_parent: Option<&String> = None;
    for id in path {
        match parents.get(id) {
            None => {
                return Err(Error::Validation(format!(
                    "path references unknown message {}",
                    id
                )))
            }
            Some(parent) if parent.as_ref() != expected_parent => {
                return Err(Error::Validation(format!(
                    "path is not a contiguous root-to-node walk at message {}",
                    id
                )))
            }
            Some(_) => expected_parent = Some(id),
        }
    }
    Ok(())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Validation(format!("bad timestamp '{}': {}", value, e)))
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub title: String,
    pub current_path: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

struct RawConversationRow {
    id: String,
    title: String,
    current_path: String,
    created_at: String,
    updated_at: String,
    message_count: i64,
}

impl RawConversationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            current_path: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            message_count: row.get(5)?,
        })
    }
}

impl TryFrom<RawConversationRow> for ConversationRow {
    type Error = Error;

    fn try_from(raw: RawConversationRow) -> Result<Self> {
        Ok(Self {
            current_path: serde_json::from_str(&raw.current_path)?,
            created_at: parse_ts(&raw.created_at)?,
            updated_at: parse_ts(&raw.updated_at)?,
            id: raw.id,
            title: raw.title,
            message_count: raw.message_count,
        })
    }
}

struct RawMessageRow {
    id: String,
    conversation_id: String,
    parent_id: Option<String>,
    role: String,
    content: String,
    branch_index: i64,
    timestamp: String,
}

impl RawMessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            parent_id: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            branch_index: row.get(5)?,
            timestamp: row.get(6)?,
        })
    }
}

impl TryFrom<RawMessageRow> for Message {
    type Error = Error;

    fn try_from(raw: RawMessageRow) -> Result<Self> {
        let mut message = Message::new(raw.role.parse()?, raw.content, raw.conversation_id, raw.parent_id)
            .with_id(raw.id);
        message.branch_index = u32::try_from(raw.branch_index)
            .map_err(|_| Error::Validation(format!("negative branch index on {}", message.id)))?;
        message.timestamp = parse_ts(&raw.timestamp)?;
        Ok(message)
    }
}
