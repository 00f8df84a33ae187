use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::{Node, NodeEvent, NodeState, NodeStats};
use crate::config::NodeConfig;
use crate::error::{MusicError, MusicResult};

/// Registry of audio nodes in registration order.
///
/// Penalties are read on every selection and written only when the transport
/// reports new stats, so a read-mostly lock is enough.
#[derive(Debug, Default)]
pub struct NodePool {
    nodes: RwLock<Vec<Node>>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every configured node in the `Disconnected` state.
    pub fn from_config(configs: &[NodeConfig]) -> Self {
        let pool = Self::new();
        for node in configs {
            pool.add_node(Node::new(&node.name, node.rest_url(), &node.password));
        }
        pool
    }

    /// Adds a node, replacing any node registered under the same name.
    pub fn add_node(&self, node: Node) {
        let mut nodes = self.nodes.write();
        if let Some(existing) = nodes.iter_mut().find(|n| n.name == node.name) {
            debug!("Replacing node {}", node.name);
            *existing = node;
        } else {
            info!("🎼 Registered node {} ({})", node.name, node.rest_url);
            nodes.push(node);
        }
    }

    pub fn remove_node(&self, name: &str) -> bool {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|n| n.name != name);
        nodes.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Node> {
        self.nodes.read().iter().find(|n| n.name == name).cloned()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    pub fn usable_nodes(&self) -> Vec<Node> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_connected())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Picks the node for the next operation.
    ///
    /// A connected `preferred` node is returned as-is; otherwise the connected
    /// node with the lowest penalty wins, first registered on ties.
    pub fn select_node(&self, preferred: Option<&str>) -> MusicResult<Node> {
        let nodes = self.nodes.read();

        if let Some(name) = preferred {
            if let Some(node) = nodes.iter().find(|n| n.name == name && n.is_connected()) {
                return Ok(node.clone());
            }
            debug!("Preferred node {} is not connected, falling back", name);
        }

        nodes
            .iter()
            .filter(|n| n.is_connected())
            .min_by_key(|n| n.penalty)
            .cloned()
            .ok_or(MusicError::NoNodesAvailable)
    }

    pub fn set_state(&self, name: &str, state: NodeState) -> bool {
        self.update(name, |node| node.state = state)
    }

    pub fn set_penalty(&self, name: &str, penalty: u64) -> bool {
        self.update(name, |node| node.penalty = penalty)
    }

    pub fn record_stats(&self, name: &str, stats: &NodeStats) -> bool {
        let penalty = stats.penalty();
        debug!("Node {} penalty is now {}", name, penalty);
        self.set_penalty(name, penalty)
    }

    /// Records a lifecycle event. Reconnection is left to the transport.
    pub fn record_event(&self, event: &NodeEvent) {
        let known = match event {
            NodeEvent::Connecting { node } => self.set_state(node, NodeState::Connecting),
            NodeEvent::Ready { node, resumed } => {
                info!(
                    "✅ Node {} is now connected. This connection is {}",
                    node,
                    if *resumed { "resumed" } else { "a new connection" }
                );
                self.set_state(node, NodeState::Connected)
            }
            NodeEvent::Error { node, error } => {
                error!("❌ Node {} emitted an error: {}", node, error);
                self.get(node).is_some()
            }
            NodeEvent::Closed { node, code, reason } => {
                warn!(
                    "Node {} closed with code {}. Reason: {}",
                    node,
                    code,
                    reason.as_deref().unwrap_or("No reason")
                );
                self.set_state(node, NodeState::Disconnected)
            }
            NodeEvent::Disconnected { node, reason } => {
                warn!(
                    "🔌 Node {} disconnected. Reason: {}",
                    node,
                    reason.as_deref().unwrap_or("No reason")
                );
                self.set_state(node, NodeState::Disconnected)
            }
            NodeEvent::Stats { node, stats } => self.record_stats(node, stats),
        };

        if !known {
            warn!("Event for unknown node {}", event.node_name());
        }
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut Node)) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.iter_mut().find(|n| n.name == name) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }
}
