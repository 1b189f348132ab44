//! Sync protocol between a session's working copy and the persisted tree.
//!
//! The session mutates a working [`ConversationTree`] and keeps the last
//! state the store accepted as its confirmed snapshot. Pending writes are
//! the difference between the two; a push sends them parents-first together
//! with the working path and promotes the working copy only on success.

use crate::error::Result;
use crate::store::{ConversationRepository, ConversationTree};
use crate::tree::{self, Message};

/// Messages present in `working` that the store has not confirmed, in
/// arrival order
pub fn delta(working: &ConversationTree, confirmed: &ConversationTree) -> Vec<Message> {
    working
        .messages
        .iter()
        .filter(|m| match confirmed.messages.get(&m.id) {
            Some(c) => c.content != m.content,
            None => true,
        })
        .cloned()
        .collect()
}

pub fn is_synced(working: &ConversationTree, confirmed: &ConversationTree) -> bool {
    working.current_path == confirmed.current_path && delta(working, confirmed).is_empty()
}

/// Write pending messages and overwrite the stored path with the working
/// one. Returns the number of messages sent.
pub fn push(
    repo: &dyn ConversationRepository,
    conversation_id: &str,
    working: &ConversationTree,
    confirmed: &mut ConversationTree,
) -> Result<usize> {
    let pending = delta(working, confirmed);
    repo.upsert_messages(conversation_id, &pending, &working.current_path)?;
    *confirmed = working.clone();
    Ok(pending.len())
}

/// Load the persisted tree, repairing a stored path that no longer walks the
/// tree by re-resolving it from its last known node
pub fn pull(repo: &dyn ConversationRepository, conversation_id: &str) -> Result<ConversationTree> {
    let mut loaded = repo.load_conversation_tree(conversation_id)?;
    loaded.messages.root()?;

    if !tree::is_valid_path(&loaded.messages, &loaded.current_path) {
        let repaired = loaded
            .current_path
            .iter()
            .rev()
            .find(|id| loaded.messages.contains(id))
            .map(|id| tree::resolve_path(&loaded.messages, id))
            .unwrap_or_default();
        tracing::warn!(
            conversation_id = %conversation_id,
            stored_len = loaded.current_path.len(),
            repaired_len = repaired.len(),
            "stored path is not a root-to-node walk, repaired"
        );
        loaded.current_path = repaired;
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::SqliteStore;
    use crate::tree::{MessageStore, Role};

    fn msg(id: &str, parent: Option<&str>) -> Message {
        Message::new(Role::User, id, "conv", parent.map(String::from)).with_id(id)
    }

    fn tree_of(messages: Vec<Message>, path: &[&str]) -> ConversationTree {
        ConversationTree {
            messages: MessageStore::from_messages(messages).unwrap(),
            current_path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_delta_picks_new_and_changed_messages() {
        let confirmed = tree_of(vec![msg("a", None), msg("b", Some("a"))], &["a", "b"]);
        let mut working = confirmed.clone();
        working.messages.set_content("b", "edited").unwrap();
        working.messages.upsert(msg("c", Some("b"))).unwrap();

        let ids: Vec<_> = delta(&working, &confirmed).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(!is_synced(&working, &confirmed));
        assert!(is_synced(&confirmed, &confirmed.clone()));
    }

    #[test]
    fn test_push_promotes_working_copy_on_success() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_conversation("conv", "t").unwrap();
        let mut confirmed = ConversationTree::default();
        let working = tree_of(vec![msg("a", None), msg("b", Some("a"))], &["a", "b"]);

        assert_eq!(push(&store, "conv", &working, &mut confirmed).unwrap(), 2);
        assert!(is_synced(&working, &confirmed));
        assert_eq!(push(&store, "conv", &working, &mut confirmed).unwrap(), 0);
    }

    #[test]
    fn test_push_failure_keeps_confirmed_snapshot() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut confirmed = ConversationTree::default();
        let working = tree_of(vec![msg("a", None)], &["a"]);

        let err = push(&store, "conv", &working, &mut confirmed).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(confirmed.messages.is_empty());
        assert!(!is_synced(&working, &confirmed));
    }

    #[test]
    fn test_pull_loads_persisted_tree_and_path() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_conversation("conv", "t").unwrap();
        let working = tree_of(
            vec![msg("a", None), msg("b", Some("a")), msg("c", Some("b"))],
            &["a", "b", "c"],
        );
        push(&store, "conv", &working, &mut ConversationTree::default()).unwrap();

        let pulled = pull(&store, "conv").unwrap();
        assert_eq!(pulled.current_path, vec!["a", "b", "c"]);
        assert_eq!(pulled.messages.len(), 3);
    }
}
