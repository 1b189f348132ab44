//! Root-to-node path resolution

use super::{Message, MessageStore};

/// Path from the root of `target`'s tree down to `target`.
///
/// Walks `parent_id` links upward and reverses, so the cost is the depth of
/// the node. Unknown ids yield an empty path.
pub fn resolve_path(store: &MessageStore, target: &str) -> Vec<String> {
    let mut path = Vec::new();
    let mut cursor = store.get(target);

    while let Some(message) = cursor {
        if path.len() >= store.len() {
            tracing::warn!(target_id = %target, "cycle while resolving message path");
            return Vec::new();
        }
        path.push(message.id.clone());
        cursor = match &message.parent_id {
            Some(parent_id) => match store.get(parent_id) {
                Some(parent) => Some(parent),
                None => {
                    tracing::warn!(
                        target_id = %target,
                        missing_parent = %parent_id,
                        "message path is broken"
                    );
                    return Vec::new();
                }
            },
            None => None,
        };
    }

    path.reverse();
    path
}

/// A valid path starts at a root and every step follows a child edge
pub fn is_valid_path(store: &MessageStore, path: &[String]) -> bool {
    let Some(first) = path.first() else {
        return true;
    };
    if !store.get(first).is_some_and(Message::is_root) {
        return false;
    }
    path.windows(2)
        .all(|pair| store.children_of(&pair[0]).contains(&pair[1]))
}

/// Resolve the path to `target`, then follow the most recently added child
/// until reaching a leaf
pub fn extend_to_leaf(store: &MessageStore, target: &str) -> Vec<String> {
    let mut path = resolve_path(store, target);
    while let Some(last) = path.last() {
        match store.children_of(last).last() {
            Some(child) if path.len() < store.len() => path.push(child.clone()),
            _ => break,
        }
    }
    path
}

/// Messages along a path, skipping ids the store does not know
pub fn messages_along(store: &MessageStore, path: &[String]) -> Vec<Message> {
    path.iter().filter_map(|id| store.get(id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Role;

    fn msg(id: &str, parent: Option<&str>) -> Message {
        Message::new(Role::User, id, "conv", parent.map(String::from)).with_id(id)
    }

    //     a
    //    / \
    //   b   c
    //   |   |
    //   d   e
    fn sample() -> MessageStore {
        MessageStore::from_messages(vec![
            msg("a", None),
            msg("b", Some("a")),
            msg("c", Some("a")),
            msg("d", Some("b")),
            msg("e", Some("c")),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_path_walks_to_root() {
        let store = sample();
        assert_eq!(resolve_path(&store, "e"), vec!["a", "c", "e"]);
        assert_eq!(resolve_path(&store, "d"), vec!["a", "b", "d"]);
        assert_eq!(resolve_path(&store, "a"), vec!["a"]);
    }

    #[test]
    fn test_resolve_path_unknown_id_is_empty() {
        let store = sample();
        assert!(resolve_path(&store, "nonexistent-id").is_empty());
        assert!(resolve_path(&MessageStore::new(), "a").is_empty());
    }

    #[test]
    fn test_every_resolved_path_is_a_child_walk() {
        let store = sample();
        for message in store.iter() {
            let path = resolve_path(&store, &message.id);
            assert_eq!(path.last(), Some(&message.id));
            assert!(is_valid_path(&store, &path));
        }
    }

    #[test]
    fn test_resolve_path_only_uses_targets_own_root() {
        let mut store = sample();
        store.upsert(msg("x", None)).unwrap();
        store.upsert(msg("y", Some("x"))).unwrap();
        assert_eq!(resolve_path(&store, "y"), vec!["x", "y"]);
        assert_eq!(resolve_path(&store, "d"), vec!["a", "b", "d"]);
    }

    #[test]
    fn test_is_valid_path_rejects_gaps_and_non_roots() {
        let store = sample();
        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(is_valid_path(&store, &[]));
        assert!(is_valid_path(&store, &ids(&["a", "b", "d"])));
        assert!(!is_valid_path(&store, &ids(&["a", "d"])));
        assert!(!is_valid_path(&store, &ids(&["b", "d"])));
        assert!(!is_valid_path(&store, &ids(&["a", "b", "e"])));
    }

    #[test]
    fn test_extend_to_leaf_follows_latest_child() {
        let store = sample();
        assert_eq!(extend_to_leaf(&store, "a"), vec!["a", "c", "e"]);
        assert_eq!(extend_to_leaf(&store, "b"), vec!["a", "b", "d"]);
        assert!(extend_to_leaf(&store, "missing").is_empty());
    }

    #[test]
    fn test_messages_along_preserves_order() {
        let store = sample();
        let path = resolve_path(&store, "d");
        let ids: Vec<_> = messages_along(&store, &path)
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
    }
}
