//! Attributes allocator activity to call-tree nodes by *owning* call path:
//! a free or realloc credits whichever node originally allocated the
//! block, never whatever happens to be running when the block is freed.
//! `alloc_bytes`/`free_bytes` only ever grow — a node's live footprint is
//! `alloc_bytes - free_bytes`, not a counter that gets decremented back
//! down, so the session-wide ledger invariant (the sum of live records
//! equals the sum of inclusive alloc-minus-free) holds without
//! special-casing concurrent frees.
//!
//! Reentrancy is the caller's responsibility ([`crate::session`] sets a
//! single guard shared with the call/return hook) since the hook that
//! drives this module itself allocates — growing the backing map,
//! resolving symbols — and none of that bookkeeping should be mistaken
//! for script-driven allocation.

use log::trace;

use crate::core::IntMap;
use crate::tree::{CallPathTree, NodeId};

pub struct AllocRecord {
    pub live_bytes: usize,
    pub owner: NodeId,
}

#[derive(Default)]
pub struct MemoryAttributor {
    records: IntMap<AllocRecord>,
}

impl MemoryAttributor {
    pub fn new() -> Self {
        MemoryAttributor {
            records: IntMap::new(),
        }
    }

    pub fn is_tracked(&self, addr: u64) -> bool {
        self.records.contains_key(addr)
    }

    pub fn live_bytes(&self, addr: u64) -> Option<usize> {
        self.records.query(addr).map(|r| r.live_bytes)
    }

    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }

    pub fn on_alloc(&mut self, tree: &mut CallPathTree, addr: u64, size: usize, owner: NodeId) {
        trace!("alloc {:#x} ({} bytes) owner={:?}", addr, size, owner);
        self.records.set(addr, AllocRecord { live_bytes: size, owner });
        let node = tree.node_mut(owner);
        node.alloc_bytes += size as u64;
        node.alloc_times += 1;
    }

    /// Removing an address the profiler never saw allocated is a silent
    /// no-op — it may predate the session, or belong to an unmarked
    /// coroutine.
    pub fn on_free(&mut self, tree: &mut CallPathTree, addr: u64) {
        trace!("free {:#x}", addr);
        if let Some(record) = self.records.remove(addr) {
            let node = tree.node_mut(record.owner);
            node.free_bytes += record.live_bytes as u64;
            node.free_times += 1;
        }
    }

    /// Splits a realloc into a free credited to the block's original owner
    /// and an allocation credited to `owner` (the path doing the
    /// realloc). Neither `alloc_times` nor `free_times` moves — only
    /// `realloc_times` does — so a long realloc chain doesn't inflate
    /// either counter; `realloc_times` alone preserves that churn signal.
    pub fn on_realloc(
        &mut self,
        tree: &mut CallPathTree,
        old_addr: u64,
        new_addr: u64,
        new_size: usize,
        owner: NodeId,
    ) {
        trace!(
            "realloc {:#x} -> {:#x} ({} bytes) owner={:?}",
            old_addr,
            new_addr,
            new_size,
            owner
        );

        if let Some(old) = self.records.remove(old_addr) {
            let old_node = tree.node_mut(old.owner);
            old_node.free_bytes += old.live_bytes as u64;
        }

        self.records.set(
            new_addr,
            AllocRecord {
                live_bytes: new_size,
                owner,
            },
        );
        let node = tree.node_mut(owner);
        node.alloc_bytes += new_size as u64;
        node.realloc_times += 1;
    }
}
