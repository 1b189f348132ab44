//! Select and branch commands: move the active path without sending

use anyhow::Result;

use super::short_id;
use crate::branch;
use crate::store::{ConversationRepository, SqliteStore};
use crate::sync;
use crate::tree;

/// Show the branch through a message, down to its newest leaf
pub fn select(store: &SqliteStore, conversation: String, message: String) -> Result<()> {
    move_path(store, &conversation, &message, |messages, id| {
        Ok(tree::extend_to_leaf(messages, id))
    })
}

/// Make the next `send` continue from a message
pub fn branch(store: &SqliteStore, conversation: String, message: String) -> Result<()> {
    move_path(store, &conversation, &message, |messages, id| {
        Ok(branch::branch_to(messages, id)?)
    })
}

fn move_path(
    store: &SqliteStore,
    conversation: &str,
    message: &str,
    compute: impl FnOnce(&tree::MessageStore, &str) -> Result<Vec<String>>,
) -> Result<()> {
    let row = super::resolve_conversation(store, Some(conversation))?;
    let loaded = sync::pull(store, &row.id)?;
    let message_id = super::resolve_message(loaded.messages.iter().map(|m| m.id.as_str()), message)?;

    let path = compute(&loaded.messages, &message_id)?;
    store.upsert_messages(&row.id, &[], &path)?;
    store.set_last_active(Some(&row.id))?;

    let tail: Vec<&str> = path.iter().map(|id| short_id(id)).collect();
    println!("Active path ({} messages): {}", path.len(), tail.join(" > "));
    Ok(())
}
