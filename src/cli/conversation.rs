//! New and delete commands for conversations

use anyhow::Result;

use crate::locale::Locale;
use crate::store::{ConversationRepository, SqliteStore};
use crate::tree::generate_id;

pub fn create(store: &SqliteStore, locale: Locale, title: Option<String>) -> Result<()> {
    let id = generate_id("conv");
    let title = title.unwrap_or_else(|| locale.placeholder_title().to_string());
    store.create_conversation(&id, &title)?;
    store.set_last_active(Some(&id))?;
    println!("Conversation '{}' created with ID: {}", title, id);
    Ok(())
}

pub fn delete(store: &SqliteStore, query: String) -> Result<()> {
    let conversation = super::resolve_conversation(store, Some(&query))?;
    store.delete_conversation(&conversation.id)?;
    println!(
        "Deleted conversation '{}' ({} messages)",
        conversation.title, conversation.message_count
    );
    Ok(())
}
