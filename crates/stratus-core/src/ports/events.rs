//! Node change events
//!
//! The cloud transport batches change notifications into a
//! [`NodeEventQueue`]; the inode database applies each batch atomically
//! under a single transaction. Each event is consumed exactly once.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::domain::newtypes::{BindHandle, NodeHandle};
use crate::ports::cloud_client::NodeInfo;

/// What happened to a cloud node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEventKind {
    Added,
    Modified,
    Moved,
    Removed,
    PermissionsChanged,
}

/// A single change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    /// The affected node.
    pub handle: NodeHandle,
    /// The node's parent at the location the event describes.
    pub parent_handle: Option<NodeHandle>,
    /// The node's name at the location the event describes.
    pub name: String,
    /// Whether the node is a directory.
    pub is_directory: bool,
    /// For `Added`: bind token of the upload that created the node, when the
    /// node was created by one of our own uploads.
    pub bind_handle: Option<BindHandle>,
    /// For `Moved`: the node's fresh description at its new location.
    pub info: Option<NodeInfo>,
}

/// A non-empty batch of events, applied in queue order.
#[derive(Debug, Default)]
pub struct NodeEventQueue {
    events: VecDeque<NodeEvent>,
}

impl NodeEventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, event: NodeEvent) {
        self.events.push_back(event);
    }

    pub fn pop_front(&mut self) -> Option<NodeEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<NodeEvent>> for NodeEventQueue {
    fn from(events: Vec<NodeEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

impl Iterator for NodeEventQueue {
    type Item = NodeEvent;

    fn next(&mut self) -> Option<NodeEvent> {
        self.pop_front()
    }
}
