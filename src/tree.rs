//! The call-tree: one node per distinct call path, built incrementally as
//! the call hook fires. Rendered here as an arena with non-owning index
//! back-references rather than the original's raw `parent` pointer — the
//! natural Rust shape for a tree whose nodes outlive any single traversal
//! and whose parent link is a weak reference, never an owner.

use crate::core::types::{Prototype, SymbolInfo};
use crate::core::IntMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Root-sentinel prototype value. No real callable hashes to this because
/// host-assigned identities are non-null pointers in the original VM.
const ROOT_PROTOTYPE: Prototype = Prototype(0);

pub struct CallPathNode {
    pub prototype: Prototype,
    pub parent: Option<NodeId>,
    pub depth: u32,
    children: IntMap<NodeId>,

    /// Display attributes, filled from the symbol table on first
    /// observation of this path. `None` until then.
    pub name: Option<String>,
    pub source: Option<String>,
    pub line: i64,

    pub call_count: u64,
    /// Self-time in nanoseconds: wall clock spent in this frame excluding
    /// descendants and excluding intervals the owning coroutine was
    /// yielded.
    pub real_cost: u64,
    pub last_return_time: u64,
    pub alloc_bytes: u64,
    pub free_bytes: u64,
    pub alloc_times: u64,
    pub free_times: u64,
    pub realloc_times: u64,
    pub cpu_samples: u64,
}

impl CallPathNode {
    fn new(prototype: Prototype, parent: Option<NodeId>, depth: u32) -> Self {
        CallPathNode {
            prototype,
            parent,
            depth,
            children: IntMap::new(),
            name: None,
            source: None,
            line: 0,
            call_count: 0,
            real_cost: 0,
            last_return_time: 0,
            alloc_bytes: 0,
            free_bytes: 0,
            alloc_times: 0,
            free_times: 0,
            realloc_times: 0,
            cpu_samples: 0,
        }
    }

    /// `inuse_bytes = max(alloc_bytes - free_bytes, 0)`, clamped rather than
    /// wrapping since `free_bytes` can momentarily exceed a node's own
    /// `alloc_bytes` while inclusive child contributions are still pending.
    pub fn inuse_bytes(&self) -> u64 {
        self.alloc_bytes.saturating_sub(self.free_bytes)
    }
}

/// Inclusive totals for a node: its own counters plus every descendant's,
/// recomputed on demand at dump time rather than maintained incrementally
/// (per the original's dump-time walk rather than live bubbling).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeTotals {
    pub call_count: u64,
    pub real_cost: u64,
    pub alloc_bytes: u64,
    pub free_bytes: u64,
    pub alloc_times: u64,
    pub free_times: u64,
    pub realloc_times: u64,
    pub cpu_samples: u64,
}

impl NodeTotals {
    pub fn inuse_bytes(&self) -> u64 {
        self.alloc_bytes.saturating_sub(self.free_bytes)
    }
}

pub struct CallPathTree {
    nodes: Vec<CallPathNode>,
}

impl CallPathTree {
    pub fn new() -> Self {
        let mut root = CallPathNode::new(ROOT_PROTOTYPE, None, 0);
        root.name = Some("root".to_string());
        root.source = Some("root".to_string());
        CallPathTree { nodes: vec![root] }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &CallPathNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut CallPathNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Finds (or creates) `parent`'s child for `prototype`, incrementing its
    /// call count. Fills in the node's display attributes the first time
    /// it's observed via `resolve`.
    pub fn enter(&mut self, parent: NodeId, prototype: Prototype) -> NodeId {
        if let Some(existing) = self.nodes[parent.0].children.query(prototype.as_u64()) {
            let id = *existing;
            self.nodes[id.0].call_count += 1;
            return id;
        }

        let depth = self.nodes[parent.0].depth + 1;
        let id = NodeId(self.nodes.len());
        self.nodes.push(CallPathNode::new(prototype, Some(parent), depth));
        self.nodes[parent.0].children.set(prototype.as_u64(), id);
        self.nodes[id.0].call_count += 1;
        id
    }

    /// Fills in `id`'s display attributes from `symbol` if this is the
    /// first time the node has been observed — the symbol table is only
    /// consulted once per path node, not once per call.
    pub fn resolve(&mut self, id: NodeId, symbol: &SymbolInfo) {
        let node = &mut self.nodes[id.0];
        if node.name.is_none() {
            node.name = Some(symbol.name.clone());
            node.source = Some(symbol.source.clone());
            node.line = symbol.line;
        }
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.nodes[id.0].children.dump(|_, child| out.push(*child));
        out
    }

    /// Root-to-leaf prototypes for `id`, excluding the synthetic root node.
    pub fn path_prototypes(&self, id: NodeId) -> Vec<Prototype> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            if node_id == self.root() {
                break;
            }
            path.push(self.nodes[node_id.0].prototype);
            cursor = self.nodes[node_id.0].parent;
        }
        path.reverse();
        path
    }

    /// Root-to-leaf node ids for `id`, root included.
    pub fn path_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(node_id) = cursor {
            path.push(node_id);
            if node_id == self.root() {
                break;
            }
            cursor = self.nodes[node_id.0].parent;
        }
        path.reverse();
        path
    }

    pub fn totals(&self, id: NodeId) -> NodeTotals {
        let node = &self.nodes[id.0];
        let mut totals = NodeTotals {
            call_count: node.call_count,
            real_cost: node.real_cost,
            alloc_bytes: node.alloc_bytes,
            free_bytes: node.free_bytes,
            alloc_times: node.alloc_times,
            free_times: node.free_times,
            realloc_times: node.realloc_times,
            cpu_samples: node.cpu_samples,
        };
        for child in self.children(id) {
            let child_totals = self.totals(child);
            totals.real_cost += child_totals.real_cost;
            totals.alloc_bytes += child_totals.alloc_bytes;
            totals.free_bytes += child_totals.free_bytes;
            totals.alloc_times += child_totals.alloc_times;
            totals.free_times += child_totals.free_times;
            totals.realloc_times += child_totals.realloc_times;
            totals.cpu_samples += child_totals.cpu_samples;
        }
        totals
    }
}

impl Default for CallPathTree {
    fn default() -> Self {
        Self::new()
    }
}
