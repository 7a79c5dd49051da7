//! Union-find over recompute groups
//!
//! Buffers evicted next to each other are likely to be recomputed together, so
//! their groups are merged and the root carries the summed compute time. The
//! root's compute time is a cheap proxy for the cost of bringing a whole
//! evicted region back, used by the `eq` family of heuristics.
//!
//! Nodes are never removed. A buffer that is recomputed leaves its group by
//! moving to a fresh singleton node; the old node stays as an interior link
//! for the other members that were compressed through it.

use std::fmt;

/// Handle to a node in a [`DisjointSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct DisjNode {
    compute_time: f64,
    parent: Option<NodeId>,
}

/// Forest of recompute groups
#[derive(Debug, Default, Clone)]
pub struct DisjointSet {
    nodes: Vec<DisjNode>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a singleton group
    pub fn make_set(&mut self, compute_time: f64) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(DisjNode {
            compute_time,
            parent: None,
        });
        id
    }

    /// Total number of nodes ever created
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compute time stored on `id` itself (the group total when `id` is a root)
    pub fn compute_time(&self, id: NodeId) -> f64 {
        self.nodes[id.index()].compute_time
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        self.nodes[id.index()].parent.is_none()
    }

    /// Root of `id`'s group, compressing the path on the way
    pub fn find_father(&mut self, id: NodeId) -> NodeId {
        let root = self.find_root(id);

        let mut current = id;
        while let Some(parent) = self.nodes[current.index()].parent {
            if parent != root {
                self.nodes[current.index()].parent = Some(root);
            }
            current = parent;
        }
        root
    }

    /// Root of `id`'s group without touching the structure
    pub fn find_root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current.index()].parent {
            current = parent;
        }
        current
    }

    /// Compute time of the group containing `id`
    pub fn root_compute_time(&self, id: NodeId) -> f64 {
        self.compute_time(self.find_root(id))
    }

    /// Merge `x`'s group into `y`'s; the surviving root carries the sum
    ///
    /// Returns the surviving root. Merging a group with itself is a no-op.
    pub fn union(&mut self, x: NodeId, y: NodeId) -> NodeId {
        let root_x = self.find_father(x);
        let root_y = self.find_father(y);
        if root_x == root_y {
            return root_y;
        }

        let moved = self.nodes[root_x.index()].compute_time;
        self.nodes[root_y.index()].compute_time += moved;
        self.nodes[root_x.index()].parent = Some(root_y);
        root_y
    }

    /// Take a member out of its group after it became resident again
    ///
    /// Subtracts `own_compute_time` from the group total (never below zero)
    /// and returns a fresh singleton node carrying `new_compute_time`.
    pub fn detach(&mut self, id: NodeId, own_compute_time: f64, new_compute_time: f64) -> NodeId {
        let root = self.find_father(id);
        let total = &mut self.nodes[root.index()].compute_time;
        *total = (*total - own_compute_time).max(0.0);
        self.make_set(new_compute_time)
    }

    /// Shift the total of `id`'s group by `delta` (never below zero)
    pub fn adjust(&mut self, id: NodeId, delta: f64) {
        let root = self.find_father(id);
        let total = &mut self.nodes[root.index()].compute_time;
        *total = (*total + delta).max(0.0);
    }

    /// Detached copy of the chain from `id` to its root
    ///
    /// Used by cost queries that only hold a shared borrow: the probe answers
    /// the same root and group total as the live structure without path
    /// compression.
    pub fn pseudo(&self, id: NodeId) -> PseudoNode {
        let mut chain = Vec::new();
        let mut current = id;
        loop {
            let node = &self.nodes[current.index()];
            chain.push((current, node.compute_time));
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        PseudoNode { chain }
    }
}

/// Non-mutating copy of one node's path to its root
#[derive(Debug, Clone)]
pub struct PseudoNode {
    chain: Vec<(NodeId, f64)>,
}

impl PseudoNode {
    /// Node the probe was taken from
    pub fn origin(&self) -> NodeId {
        self.chain[0].0
    }

    pub fn root(&self) -> NodeId {
        self.chain[self.chain.len() - 1].0
    }

    pub fn root_compute_time(&self) -> f64 {
        self.chain[self.chain.len() - 1].1
    }

    /// Number of links between the origin and the root
    pub fn depth(&self) -> usize {
        self.chain.len() - 1
    }
}
