//! Node identity and the fixed ring of peers.
//!
//! The peer list delivered by `init` never changes for the lifetime of the
//! node. Its order defines the ring: each node's successor is the next entry,
//! wrapping past the end.

/// This node's id and the full cluster membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    node_id: String,
    node_ids: Vec<String>,
}

impl Membership {
    /// Create a membership view.
    ///
    /// `node_ids` is the full cluster in ring order. If it does not contain
    /// `node_id`, this node is appended so that it still has a place on the
    /// ring.
    pub fn new(node_id: impl Into<String>, mut node_ids: Vec<String>) -> Self {
        let node_id = node_id.into();
        if !node_ids.contains(&node_id) {
            node_ids.push(node_id.clone());
        }
        Self { node_id, node_ids }
    }

    /// This node's id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Every node in ring order, including this one.
    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    /// Every node except this one, in ring order.
    pub fn peers(&self) -> impl Iterator<Item = &str> + '_ {
        self.node_ids
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self.node_id)
    }

    /// Number of nodes in the cluster, including this one.
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    /// Always `false`: a membership contains at least this node.
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Whether this node is alone on the ring.
    pub fn is_singleton(&self) -> bool {
        self.node_ids.len() <= 1
    }

    /// The next node on the ring, or `None` if this node is alone.
    pub fn successor(&self) -> Option<&str> {
        let pos = self.node_ids.iter().position(|id| *id == self.node_id)?;
        let next = &self.node_ids[(pos + 1) % self.node_ids.len()];
        (*next != self.node_id).then_some(next.as_str())
    }

    /// Number of hops from this node to `target` walking successors, if
    /// `target` is a member.
    pub fn ring_distance(&self, target: &str) -> Option<usize> {
        let from = self.node_ids.iter().position(|id| *id == self.node_id)?;
        let to = self.node_ids.iter().position(|id| id == target)?;
        let n = self.node_ids.len();
        Some((to + n - from) % n)
    }
}
