//! Turns a finished (or still-running) session into the two payload shapes
//! `dump()` can hand back: a nested per-call-path structure for CPU-profile
//! and memory-profile mode, and a flat folded-stack line list for CPU-sample
//! mode. Percentages are derived here, at export time, from whatever totals
//! the tree already carries — they are never stored on `CallPathNode` itself.

use serde::Serialize;

use crate::options::{CpuMode, MemMode, Options};
use crate::tree::{CallPathTree, NodeId};

/// One call-path node's exported view: its own (not inclusive) counters,
/// `"%.2f"`-formatted shares of the session total, and its children.
///
/// `name` is formatted `"<name> <source>:<line>"`, matching the embedding
/// surface's dump contract; `source`/`line` are also exposed unformatted for
/// callers that want to sort or filter on them without reparsing `name`.
#[derive(Debug, Clone, Serialize)]
pub struct DumpNode {
    pub name: String,
    pub source: String,
    pub line: i64,
    pub call_count: u64,
    pub cpu_cost_ns: u64,
    pub cpu_cost_percent: String,
    pub last_return_time_ns: u64,
    pub alloc_bytes: u64,
    pub free_bytes: u64,
    pub inuse_bytes: u64,
    pub alloc_times: u64,
    pub free_times: u64,
    pub realloc_times: u64,
    pub cpu_samples: u64,
    /// Populated only on the dump's root node: the session's cumulative
    /// hook self-overhead, never on any other node.
    pub profile_cost_ns: Option<u64>,
    pub children: Vec<DumpNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallTreeDump {
    pub cpu_mode: &'static str,
    pub mem_mode: &'static str,
    pub root: DumpNode,
}

/// The two shapes a session dump can hand back, depending on CPU mode.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DumpPayload {
    Tree(CallTreeDump),
    Samples(SampleDump),
}

/// One folded-stack line from sample mode, already `"<root>;...;<leaf> <count>"`
/// formatted by [`crate::sampler::CpuSampler::folded_lines`]; kept as a
/// named payload rather than a bare `Vec<String>` so JSON and text export
/// share one entry point.
#[derive(Debug, Clone, Serialize)]
pub struct SampleDump {
    pub total_samples: u64,
    pub lines: Vec<String>,
}

fn percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        return format!("{:.2}", 0.0);
    }
    format!("{:.2}", (part as f64 / whole as f64) * 100.0)
}

fn mode_label(cpu: CpuMode) -> &'static str {
    match cpu {
        CpuMode::Off => "off",
        CpuMode::Profile => "profile",
        CpuMode::Sample => "sample",
    }
}

fn mem_label(mem: MemMode) -> &'static str {
    match mem {
        MemMode::Off => "off",
        MemMode::Profile => "profile",
    }
}

/// Builds one node's exported view. `cpu_cost_ns` stays self-time only,
/// matching `CallPathNode::real_cost`; the allocation and sample counters
/// are inclusive aggregates (own counters plus every descendant's) taken
/// from [`CallPathTree::totals`] rather than the node's own fields.
fn build_node(tree: &CallPathTree, id: NodeId, session_total_cost: u64) -> DumpNode {
    let node = tree.node(id);
    let totals = tree.totals(id);
    let name = node.name.clone().unwrap_or_default();
    let source = node.source.clone().unwrap_or_default();
    DumpNode {
        name: format!("{} {}:{}", name, source, node.line),
        source,
        line: node.line,
        call_count: node.call_count,
        cpu_cost_ns: node.real_cost,
        cpu_cost_percent: percent(node.real_cost, session_total_cost),
        last_return_time_ns: node.last_return_time,
        alloc_bytes: totals.alloc_bytes,
        free_bytes: totals.free_bytes,
        inuse_bytes: totals.inuse_bytes(),
        alloc_times: totals.alloc_times,
        free_times: totals.free_times,
        realloc_times: totals.realloc_times,
        cpu_samples: totals.cpu_samples,
        profile_cost_ns: None,
        children: tree
            .children(id)
            .into_iter()
            .map(|child| build_node(tree, child, session_total_cost))
            .collect(),
    }
}

/// Builds the nested call-tree payload for profile-mode CPU/memory dumps.
/// Percentages are relative to the root's inclusive `real_cost` (everything
/// charged to any node at all), which is what the original's dump walk
/// divides every node's cost by. `profile_cost_ns` is the session's
/// cumulative hook self-overhead, stamped onto the root node only.
pub fn dump_call_tree(tree: &CallPathTree, options: &Options, profile_cost_ns: u64) -> CallTreeDump {
    let total = tree.totals(tree.root()).real_cost;
    let mut root = build_node(tree, tree.root(), total);
    root.profile_cost_ns = Some(profile_cost_ns);
    CallTreeDump {
        cpu_mode: mode_label(options.cpu),
        mem_mode: mem_label(options.mem),
        root,
    }
}

pub fn dump_samples(total_samples: u64, lines: Vec<String>) -> SampleDump {
    SampleDump { total_samples, lines }
}

/// Renders a [`CallTreeDump`] as JSON, matching the original's dump-to-
/// script-table shape close enough that a host binding could hand it back
/// verbatim.
pub fn to_json(dump: &CallTreeDump) -> serde_json::Result<String> {
    serde_json::to_string_pretty(dump)
}
