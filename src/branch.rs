//! Branch engine: where a new node attaches and what the active path becomes.
//!
//! Nothing here rewrites an existing node. The only mutation is appending a
//! new child id to the chosen parent, done through [`MessageStore::upsert`].

use crate::error::{Error, Result};
use crate::tree::{self, Message, MessageStore};

/// Where the next user message should attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchPoint<'a> {
    /// Continue from the end of the current path
    Continue,
    /// Fork from an existing message, leaf or not
    From(&'a str),
}

impl<'a> BranchPoint<'a> {
    pub fn from_option(parent: Option<&'a str>) -> Self {
        parent.map_or(BranchPoint::Continue, BranchPoint::From)
    }
}

/// Parent of the new node and the path leading to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPlan {
    pub parent_id: Option<String>,
    pub base_path: Vec<String>,
}

pub fn plan(store: &MessageStore, current_path: &[String], point: BranchPoint<'_>) -> Result<BranchPlan> {
    match point {
        BranchPoint::Continue => {
            let Some(last) = current_path.last() else {
                return Ok(BranchPlan {
                    parent_id: None,
                    base_path: Vec::new(),
                });
            };
            if !store.contains(last) {
                return Err(Error::Validation(format!(
                    "current path ends at unknown message {}",
                    last
                )));
            }
            let base_path = if tree::is_valid_path(store, current_path) {
                current_path.to_vec()
            } else {
                tracing::warn!(leaf = %last, "current path is not contiguous, re-resolving");
                tree::resolve_path(store, last)
            };
            Ok(BranchPlan {
                parent_id: Some(last.clone()),
                base_path,
            })
        }
        BranchPoint::From(parent_id) => {
            let base_path = tree::resolve_path(store, parent_id);
            if base_path.is_empty() {
                return Err(Error::message_not_found(parent_id));
            }
            Ok(BranchPlan {
                parent_id: Some(parent_id.to_string()),
                base_path,
            })
        }
    }
}

/// Attach `message` under the planned parent and return the new active path
pub fn attach(store: &mut MessageStore, plan: &BranchPlan, message: Message) -> Result<Vec<String>> {
    attach_under(store, &plan.base_path, plan.parent_id.clone(), message)
}

/// Attach `message` as the next node after the end of `path`
pub fn attach_to_path(store: &mut MessageStore, path: &[String], message: Message) -> Result<Vec<String>> {
    attach_under(store, path, path.last().cloned(), message)
}

fn attach_under(
    store: &mut MessageStore,
    base_path: &[String],
    parent_id: Option<String>,
    mut message: Message,
) -> Result<Vec<String>> {
    if parent_id.is_none() && !store.is_empty() {
        return Err(Error::Validation(format!(
            "conversation already has a root; message {} needs a parent",
            message.id
        )));
    }
    message.branch_index = parent_id
        .as_deref()
        .map_or(0, |p| store.children_of(p).len() as u32);
    message.parent_id = parent_id;

    let id = message.id.clone();
    store.upsert(message)?;

    let mut path = base_path.to_vec();
    path.push(id);
    Ok(path)
}

/// Path that ends exactly at `message_id`, for continuing from that node
pub fn branch_to(store: &MessageStore, message_id: &str) -> Result<Vec<String>> {
    let path = tree::resolve_path(store, message_id);
    if path.is_empty() {
        return Err(Error::message_not_found(message_id));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Role;

    fn seeded() -> (MessageStore, Vec<String>) {
        let mut store = MessageStore::new();
        let first = plan(&store, &[], BranchPoint::Continue).unwrap();
        let path = attach(&mut store, &first, Message::user("A", "conv", None).with_id("A")).unwrap();
        let path = attach_to_path(
            &mut store,
            &path,
            Message::new(Role::Assistant, "B", "conv", None).with_id("B"),
        )
        .unwrap();
        (store, path)
    }

    #[test]
    fn test_first_message_becomes_root() {
        let (store, path) = seeded();
        assert_eq!(path, vec!["A", "B"]);
        assert!(store.get("A").unwrap().is_root());
        assert_eq!(store.get("B").unwrap().parent_id.as_deref(), Some("A"));
    }

    #[test]
    fn test_continue_attaches_to_path_end() {
        let (mut store, path) = seeded();
        let plan = plan(&store, &path, BranchPoint::Continue).unwrap();
        assert_eq!(plan.parent_id.as_deref(), Some("B"));
        let path = attach(&mut store, &plan, Message::user("C", "conv", None).with_id("C")).unwrap();
        assert_eq!(path, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_branch_from_earlier_node_forks_sibling() {
        let (mut store, path) = seeded();
        let before_b = store.get("B").cloned().unwrap();

        let plan = plan(&store, &path, BranchPoint::From("A")).unwrap();
        assert_eq!(plan.base_path, vec!["A"]);
        let path = attach(&mut store, &plan, Message::user("C", "conv", None).with_id("C")).unwrap();

        assert_eq!(path, vec!["A", "C"]);
        assert_eq!(store.children_of("A"), ["B", "C"]);
        assert_eq!(store.get("C").unwrap().branch_index, 1);
        assert_eq!(store.get("B"), Some(&before_b));
    }

    #[test]
    fn test_branch_from_unknown_node_is_not_found() {
        let (store, path) = seeded();
        let err = plan(&store, &path, BranchPoint::From("ghost")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_second_root_is_rejected() {
        let (mut store, _) = seeded();
        let err = attach_to_path(&mut store, &[], Message::user("X", "conv", None)).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_broken_current_path_is_re_resolved() {
        let (store, _) = seeded();
        let plan = plan(&store, &["B".to_string()], BranchPoint::Continue).unwrap();
        assert_eq!(plan.base_path, vec!["A", "B"]);
    }

    #[test]
    fn test_branch_to_ends_at_node() {
        let (store, _) = seeded();
        assert_eq!(branch_to(&store, "A").unwrap(), vec!["A"]);
        assert!(branch_to(&store, "nope").is_err());
    }
}
