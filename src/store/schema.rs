//! SQLite schema definition
//!
//! - conversations own their messages (cascade on delete)
//! - messages store only the upward `parent_id` link; children are derived on load
//! - current_path is a JSON array, always overwritten whole

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================
-- CONVERSATIONS
-- ============================================

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,                   -- 'conv_<hex>'
    title TEXT NOT NULL,
    current_path TEXT NOT NULL DEFAULT '[]', -- JSON array of message ids, root first
    created_at TEXT NOT NULL,              -- RFC 3339, UTC
    updated_at TEXT NOT NULL
);

-- ============================================
-- MESSAGES
-- ============================================

-- Insertion order (rowid) is sibling order
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,                   -- 'msg_<hex>'
    conversation_id TEXT NOT NULL,
    parent_id TEXT,                        -- NULL only for the root
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    content TEXT NOT NULL,
    branch_index INTEGER NOT NULL DEFAULT 0,
    timestamp TEXT NOT NULL,
    FOREIGN KEY(conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY(parent_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ============================================
-- APP STATE
-- ============================================

-- 'last_conversation_id' -> conversation id
CREATE TABLE IF NOT EXISTS app_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);
"#;
