//! # Nodes Module
//!
//! Bookkeeping for the pool of Lavalink-style audio nodes.
//!
//! Nodes are connected and reconnected by the external transport; this module
//! only records what the transport reports (lifecycle events and load stats)
//! and picks a node for each resolution or session request.
//!
//! ## Selection
//!
//! [`NodePool::select_node`] only considers nodes in [`NodeState::Connected`].
//! A preferred node name wins when that node is connected, otherwise the node
//! with the lowest penalty is chosen, ties going to the node registered first.

pub mod pool;
pub mod stats;

use serde::Serialize;
use std::fmt;

pub use pool::NodePool;
pub use stats::{CpuStats, FrameStats, NodeStats};

/// Connection state of a node, as last reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Connected,
    Connecting,
    Disconnected,
}

/// A snapshot of one audio node.
#[derive(Clone, Serialize)]
pub struct Node {
    pub name: String,
    /// Base URL of the node's REST API, e.g. `http://localhost:2333`
    pub rest_url: String,
    #[serde(skip)]
    pub password: String,
    pub state: NodeState,
    /// Load/health score; lower is preferred
    pub penalty: u64,
}

impl Node {
    pub fn new(name: impl Into<String>, rest_url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rest_url: rest_url.into(),
            password: password.into(),
            state: NodeState::Disconnected,
            penalty: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == NodeState::Connected
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("rest_url", &self.rest_url)
            .field("state", &self.state)
            .field("penalty", &self.penalty)
            .finish()
    }
}

/// Lifecycle and load notifications pushed in by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Connecting { node: String },
    Ready { node: String, resumed: bool },
    Error { node: String, error: String },
    Closed { node: String, code: u16, reason: Option<String> },
    Disconnected { node: String, reason: Option<String> },
    Stats { node: String, stats: NodeStats },
}

impl NodeEvent {
    pub fn node_name(&self) -> &str {
        match self {
            NodeEvent::Connecting { node }
            | NodeEvent::Ready { node, .. }
            | NodeEvent::Error { node, .. }
            | NodeEvent::Closed { node, .. }
            | NodeEvent::Disconnected { node, .. }
            | NodeEvent::Stats { node, .. } => node,
        }
    }
}
