//! Show command implementation

use anyhow::Result;
use std::collections::HashSet;

use super::{preview, short_id};
use crate::store::SqliteStore;
use crate::tree::{Message, MessageStore, Role};

pub fn run(store: &SqliteStore, query: Option<String>, tree: bool) -> Result<()> {
    let row = super::resolve_conversation(store, query.as_deref())?;
    let conversation = store.load_conversation(&row.id)?;
    store.set_last_active(Some(&conversation.id))?;

    println!("\n{}", "=".repeat(80));
    println!("Conversation: {} ({})", conversation.title, conversation.id);
    println!(
        "Messages: {} | Path length: {} | Updated: {}",
        conversation.messages.len(),
        conversation.current_path.len(),
        conversation.updated_at.format("%Y-%m-%d %H:%M")
    );
    println!("{}", "=".repeat(80));

    if conversation.messages.is_empty() {
        println!("\nNo messages yet.");
        return Ok(());
    }

    if tree {
        print_tree(&conversation.messages, &conversation.current_path);
        return Ok(());
    }

    for id in &conversation.current_path {
        let Some(msg) = conversation.messages.get(id) else {
            continue;
        };
        let siblings = msg
            .parent_id
            .as_deref()
            .map_or(1, |p| conversation.messages.children_of(p).len());
        let branch_info = if siblings > 1 {
            format!(" | branch {}/{}", msg.branch_index + 1, siblings)
        } else {
            String::new()
        };

        println!(
            "\n[{}] {} | {}{}",
            role_label(msg.role),
            short_id(&msg.id),
            msg.timestamp.format("%H:%M:%S"),
            branch_info
        );
        println!("{}", "-".repeat(40));
        println!("{}", msg.content);
    }

    Ok(())
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "USER",
        Role::Assistant => "ASSISTANT",
    }
}

/// Draw every branch; `*` marks nodes on the active path
fn print_tree(messages: &MessageStore, current_path: &[String]) {
    let on_path: HashSet<&str> = current_path.iter().map(String::as_str).collect();
    println!();

    // (id, indent prefix, is last sibling)
    let mut stack: Vec<(&str, String, bool)> = messages
        .roots()
        .into_iter()
        .rev()
        .map(|id| (id, String::new(), true))
        .collect();

    while let Some((id, prefix, last)) = stack.pop() {
        let Some(msg) = messages.get(id) else {
            continue;
        };
        let is_root = msg.is_root();
        let connector = if is_root {
            ""
        } else if last {
            "└─ "
        } else {
            "├─ "
        };
        println!("{}{}{}", prefix, connector, node_label(msg, on_path.contains(id)));

        let child_prefix = if is_root {
            prefix
        } else if last {
            format!("{}   ", prefix)
        } else {
            format!("{}│  ", prefix)
        };
        let children = messages.children_of(id);
        for (i, child) in children.iter().enumerate().rev() {
            stack.push((child.as_str(), child_prefix.clone(), i + 1 == children.len()));
        }
    }
}

fn node_label(msg: &Message, on_path: bool) -> String {
    format!(
        "{} {} [{}] {}",
        if on_path { "*" } else { " " },
        short_id(&msg.id),
        msg.role,
        preview(&msg.content, 50)
    )
}
