use std::collections::HashMap;

use log::debug;

use super::Graph;
use crate::node::{Node, NodeId};

/// Old handle -> new handle, shared across one deep-copy operation.
///
/// Pre-seeding an entry redirects every reference to the old node toward the new one
/// without copying it; nodes absent from the map are shared, not copied.
pub type CopiesMap = HashMap<NodeId, NodeId>;

impl Graph {
    /// Deep-copies `nodes` (given in topological order) into fresh nodes of this graph.
    ///
    /// Parents are resolved through `copies`: a parent copied earlier in the same
    /// call, or pre-seeded by the caller, is replaced by its copy, any other parent is
    /// shared with the original. Copies get their own value and gradient storage,
    /// starting from the original's current value, and keep its bounds, name and
    /// partial-update flag. Nodes already present in `copies` are not copied again.
    ///
    /// Returns the copies in the order of `nodes`.
    pub fn clone_nodes(&mut self, nodes: &[NodeId], copies: &mut CopiesMap) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(nodes.len());
        for &id in nodes {
            if let Some(&existing) = copies.get(&id) {
                out.push(existing);
                continue;
            }
            let original = &self.nodes[id.0];
            let op = original.op.remap_parents(|p| copies.get(&p).copied().unwrap_or(p));
            let mut copy = Node::new(op, original.rows, original.cols, original.value_vec());
            copy.bounds = original.bounds;
            copy.name = original.name.clone();
            copy.allows_partial_update = original.allows_partial_update;

            let new_id = NodeId(self.nodes.len());
            self.nodes.push(copy);
            copies.insert(id, new_id);
            out.push(new_id);
        }
        debug!("cloned {} nodes ({} mapped in total)", out.len(), copies.len());
        out
    }
}
