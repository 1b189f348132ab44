//! List command implementation

use anyhow::Result;

use super::{preview, short_id};
use crate::store::{ConversationRepository, SqliteStore};

pub fn run(store: &SqliteStore) -> Result<()> {
    let conversations = store.list_conversations()?;

    if conversations.is_empty() {
        println!("No conversations found. Run 'forkchat new' first.");
        return Ok(());
    }

    let active = store.resolve_active_conversation()?;

    println!(
        "{:<2} {:<12} {:<10} {:<9} {}",
        "", "Updated", "ID", "Messages", "Title"
    );
    println!("{}", "-".repeat(80));

    for conversation in conversations {
        let marker = if active.as_deref() == Some(conversation.id.as_str()) {
            "*"
        } else {
            ""
        };

        println!(
            "{:<2} {:<12} {:<10} {:<9} {}",
            marker,
            conversation.updated_at.format("%m-%d %H:%M"),
            short_id(&conversation.id),
            conversation.message_count,
            preview(&conversation.title, 40),
        );
    }

    Ok(())
}
