//! In-memory materialization of a conversation's message tree.
//!
//! Built from the flat message list the store returns, so navigation queries
//! (active path, sibling position, branch anchors) don't round-trip to the
//! database after every local branch switch. Input is expected in creation
//! order; children lists preserve it, keeping sibling indices consistent with
//! the store's ordering.

use std::collections::HashMap;

use chat_core::{Message, SiblingInfo};

#[derive(Debug, Default)]
pub struct MessageTree {
    by_id: HashMap<String, Message>,
    children_of: HashMap<Option<String>, Vec<String>>,
    order: Vec<String>,
    active_leaf_id: Option<String>,
}

impl MessageTree {
    /// Build the adjacency maps from a flat, creation-ordered message list.
    /// O(n).
    pub fn build(messages: Vec<Message>, active_leaf_id: Option<String>) -> Self {
        let mut tree = Self {
            by_id: HashMap::with_capacity(messages.len()),
            children_of: HashMap::new(),
            order: Vec::with_capacity(messages.len()),
            active_leaf_id,
        };

        for message in messages {
            tree.order.push(message.id.clone());
            tree.children_of
                .entry(message.parent_id.clone())
                .or_default()
                .push(message.id.clone());
            tree.by_id.insert(message.id.clone(), message);
        }

        tree
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.by_id.get(message_id)
    }

    pub fn active_leaf_id(&self) -> Option<&str> {
        self.active_leaf_id.as_deref()
    }

    /// Root-to-leaf path for the recorded active leaf. With no leaf recorded
    /// every message is returned in creation order; a link that cannot be
    /// resolved ends the walk at the last known node.
    pub fn active_path(&self) -> Vec<&Message> {
        let Some(leaf_id) = self.active_leaf_id.as_deref() else {
            return self
                .order
                .iter()
                .filter_map(|id| self.by_id.get(id))
                .collect();
        };
        self.path_to(leaf_id)
    }

    /// Root-to-`message_id` path, used to assemble the history an anchor
    /// message continues from.
    pub fn path_to(&self, message_id: &str) -> Vec<&Message> {
        let mut path = Vec::new();
        let mut current = Some(message_id);

        while let Some(id) = current {
            let Some(message) = self.by_id.get(id) else {
                break;
            };
            path.push(message);
            current = message.parent_id.as_deref();

            if path.len() > self.by_id.len() {
                // A parent cycle would loop forever; bail with what resolved.
                break;
            }
        }

        path.reverse();
        path
    }

    /// Sibling navigation info for a message, or `None` when its sibling
    /// group has a single member and no navigation UI is needed. The index is
    /// 1-based for display.
    pub fn sibling_info(&self, message_id: &str) -> Option<SiblingInfo> {
        let message = self.by_id.get(message_id)?;
        let siblings = self.children_of.get(&message.parent_id)?;
        if siblings.len() <= 1 {
            return None;
        }

        let position = siblings.iter().position(|id| id == message_id)?;
        Some(SiblingInfo {
            total: siblings.len(),
            current_index: position + 1,
            sibling_ids: siblings.clone(),
        })
    }

    /// Child ids of a message (or of the root group when `None`), in creation
    /// order.
    pub fn children(&self, parent_id: Option<&str>) -> &[String] {
        self.children_of
            .get(&parent_id.map(str::to_string))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The anchor parent for branching off `message_id`: editing a message
    /// creates a sibling under this parent, regenerating an assistant message
    /// re-anchors under it. `None` for roots and unknown ids.
    pub fn parent_for_branch(&self, message_id: &str) -> Option<String> {
        self.by_id
            .get(message_id)
            .and_then(|message| message.parent_id.clone())
    }
}
