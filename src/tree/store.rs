//! Arena of message nodes keyed by id.
//!
//! Every parent/child edge goes through [`MessageStore::upsert`] or
//! [`MessageStore::remove_leaf`], so `children` and `parent_id` cannot
//! drift apart.

use std::collections::HashMap;

use super::Message;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    nodes: HashMap<String, Message>,
    /// Arrival order, used for deterministic iteration
    order: Vec<String>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from messages ordered parent-before-child.
    pub fn from_messages<I>(messages: I) -> Result<Self>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut store = Self::new();
        for message in messages {
            store.upsert(message)?;
        }
        Ok(store)
    }

    /// Insert a new node or replace the content of an existing one.
    ///
    /// A replacement keeps the node's children and may not move it to a
    /// different parent. A new node is appended to its parent's children.
    pub fn upsert(&mut self, mut message: Message) -> Result<()> {
        if message.id.trim().is_empty() {
            return Err(Error::Validation("message id is empty".to_string()));
        }
        if message.conversation_id.trim().is_empty() {
            return Err(Error::Validation(format!(
                "message {} has no conversation id",
                message.id
            )));
        }
        if message.parent_id.as_deref() == Some(message.id.as_str()) {
            return Err(Error::Validation(format!(
                "message {} cannot be its own parent",
                message.id
            )));
        }

        if let Some(existing) = self.nodes.get(&message.id) {
            if existing.parent_id != message.parent_id {
                return Err(Error::Validation(format!(
                    "message {} cannot move from parent {:?} to {:?}",
                    message.id, existing.parent_id, message.parent_id
                )));
            }
            message.children = existing.children.clone();
            self.nodes.insert(message.id.clone(), message);
            return Ok(());
        }

        if let Some(parent_id) = &message.parent_id {
            let parent = self.nodes.get_mut(parent_id).ok_or_else(|| {
                Error::Validation(format!(
                    "message {} references missing parent {}",
                    message.id, parent_id
                ))
            })?;
            if parent.conversation_id != message.conversation_id {
                return Err(Error::Validation(format!(
                    "message {} and parent {} belong to different conversations",
                    message.id, parent_id
                )));
            }
            if !parent.children.contains(&message.id) {
                parent.children.push(message.id.clone());
            }
        }

        message.children.clear();
        self.order.push(message.id.clone());
        self.nodes.insert(message.id.clone(), message);
        Ok(())
    }

    /// Detach and return a node with no children. Its parent's children
    /// list loses the id in the same step.
    pub fn remove_leaf(&mut self, id: &str) -> Result<Message> {
        let node = self.nodes.get(id).ok_or_else(|| Error::message_not_found(id))?;
        if !node.children.is_empty() {
            return Err(Error::Validation(format!(
                "message {} still has {} children",
                id,
                node.children.len()
            )));
        }
        if let Some(parent_id) = node.parent_id.clone() {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.children.retain(|c| c != id);
            }
        }
        self.order.retain(|o| o != id);
        self.nodes.remove(id).ok_or_else(|| Error::message_not_found(id))
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Ordered child ids; empty for leaves and unknown ids
    pub fn children_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|m| m.children.as_slice())
            .unwrap_or(&[])
    }

    /// Every node without a parent, in arrival order
    pub fn roots(&self) -> Vec<&str> {
        self.iter()
            .filter(|m| m.parent_id.is_none())
            .map(|m| m.id.as_str())
            .collect()
    }

    /// The conversation root. More than one root means the tree is corrupt.
    pub fn root(&self) -> Result<Option<&str>> {
        let roots = self.roots();
        match roots.len() {
            0 => Ok(None),
            1 => Ok(Some(roots[0])),
            n => Err(Error::Validation(format!(
                "expected one root message, found {}: {}",
                n,
                roots.join(", ")
            ))),
        }
    }

    /// Extend the content of a node that is still being generated
    pub fn append_content(&mut self, id: &str, delta: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::message_not_found(id))?;
        node.content.push_str(delta);
        Ok(())
    }

    pub fn set_content(&mut self, id: &str, content: impl Into<String>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| Error::message_not_found(id))?;
        node.content = content.into();
        Ok(())
    }

    /// Nodes in arrival order (parents always precede their children)
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.order.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, Message> {
        self.nodes.clone()
    }

    /// Verify the dual links and connectivity of the whole tree
    pub fn check_integrity(&self) -> Result<()> {
        for message in self.nodes.values() {
            if let Some(parent_id) = &message.parent_id {
                let parent = self.nodes.get(parent_id).ok_or_else(|| {
                    Error::Validation(format!(
                        "message {} references missing parent {}",
                        message.id, parent_id
                    ))
                })?;
                if !parent.children.contains(&message.id) {
                    return Err(Error::Validation(format!(
                        "parent {} does not list child {}",
                        parent_id, message.id
                    )));
                }
            }
            for child_id in &message.children {
                let linked = self
                    .nodes
                    .get(child_id)
                    .is_some_and(|c| c.parent_id.as_deref() == Some(message.id.as_str()));
                if !linked {
                    return Err(Error::Validation(format!(
                        "child {} of {} does not point back to it",
                        child_id, message.id
                    )));
                }
            }
        }

        let Some(root) = self.root()? else {
            return Ok(());
        };
        let mut reached = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            reached += 1;
            if reached > self.nodes.len() {
                return Err(Error::Validation("cycle detected in message tree".to_string()));
            }
            stack.extend(self.children_of(id).iter().map(String::as_str));
        }
        if reached != self.nodes.len() {
            return Err(Error::Validation(format!(
                "{} of {} messages are unreachable from the root",
                self.nodes.len() - reached,
                self.nodes.len()
            )));
        }
        Ok(())
    }
}
