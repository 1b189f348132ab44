//! Command implementations for the `forkchat` binary

pub mod conversation;
pub mod list;
pub mod navigate;
pub mod send;
pub mod settings;
pub mod show;

use anyhow::{anyhow, bail, Result};

use crate::store::{ConversationRow, SqliteStore};

/// Conversation by id or prefix, or the active one when no query is given
pub fn resolve_conversation(store: &SqliteStore, query: Option<&str>) -> Result<ConversationRow> {
    let row = match query {
        Some(q) => match store.find_conversation(q)? {
            Some(row) => Some(row),
            None if !q.starts_with("conv_") => store.find_conversation(&format!("conv_{}", q))?,
            None => None,
        },
        None => match store.resolve_active_conversation()? {
            Some(id) => store.find_conversation(&id)?,
            None => bail!("No conversations yet. Run 'forkchat new' first."),
        },
    };
    row.ok_or_else(|| anyhow!("Conversation not found: {}", query.unwrap_or_default()))
}

/// Message id by exact id or unambiguous prefix
pub fn resolve_message<'a>(ids: impl IntoIterator<Item = &'a str>, query: &str) -> Result<String> {
    let matches: Vec<&str> = ids
        .into_iter()
        .filter(|id| id.starts_with(query) || short_id(id).starts_with(query))
        .collect();
    if matches.contains(&query) {
        return Ok(query.to_string());
    }
    match matches.as_slice() {
        [] => bail!("Message not found: {}", query),
        [only] => Ok(only.to_string()),
        many => bail!("'{}' matches {} messages; use a longer prefix", query, many.len()),
    }
}

/// Id without its `msg_`/`conv_` prefix, cut to 8 characters
pub fn short_id(id: &str) -> &str {
    let bare = id.split_once('_').map_or(id, |(_, rest)| rest);
    bare.get(..8).unwrap_or(bare)
}

/// First line of `text`, cut to `max` characters
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    crate::prompt::truncate_text(line, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("msg_0123456789abcdef"), "01234567");
        assert_eq!(short_id("conv_abc"), "abc");
        assert_eq!(short_id("plain"), "plain");
    }

    #[test]
    fn test_resolve_message_by_prefix() {
        let ids = ["msg_aaaa1111", "msg_aaaa2222", "msg_bbbb3333"];
        assert_eq!(resolve_message(ids, "msg_bbbb").unwrap(), "msg_bbbb3333");
        assert_eq!(resolve_message(ids, "aaaa1").unwrap(), "msg_aaaa1111");
        assert!(resolve_message(ids, "aaaa").is_err());
        assert!(resolve_message(ids, "zz").is_err());
    }

    #[test]
    fn test_preview_uses_first_line() {
        assert_eq!(preview("hello\nworld", 10), "hello");
        assert_eq!(preview("abcdefghij", 4), "abcd...");
        assert_eq!(preview("", 4), "");
    }
}
