//! Conversation tree: message nodes, the arena that owns their links, and
//! root-to-node path resolution.

mod path;
mod store;

pub use path::{extend_to_leaf, is_valid_path, messages_along, resolve_path};
pub use store::MessageStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(Error::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// A single node of the conversation tree.
///
/// `children` is owned by [`MessageStore`]: whatever a caller puts there is
/// ignored on insert, and the store keeps it in step with `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    children: Vec<String>,
    /// Position among the parent's children at the time the node was attached
    #[serde(default)]
    pub branch_index: u32,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        conversation_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: generate_id("msg"),
            role,
            content: content.into(),
            conversation_id: conversation_id.into(),
            parent_id,
            children: Vec::new(),
            branch_index: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn user(
        content: impl Into<String>,
        conversation_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self::new(Role::User, content, conversation_id, parent_id)
    }

    pub fn assistant(
        content: impl Into<String>,
        conversation_id: impl Into<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self::new(Role::Assistant, content, conversation_id, parent_id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Generate a globally unique id of the form `{prefix}_{32 hex chars}`
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_has_prefix_and_is_unique() {
        let a = generate_id("msg");
        let b = generate_id("msg");
        assert!(a.starts_with("msg_"));
        assert_eq!(a.len(), "msg_".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_message_json_uses_camel_case() {
        let msg = Message::user("hi", "conv_1", Some("msg_p".to_string())).with_id("msg_c");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["conversationId"], "conv_1");
        assert_eq!(json["parentId"], "msg_p");
        assert_eq!(json["branchIndex"], 0);
        assert_eq!(json["role"], "user");
    }
}
