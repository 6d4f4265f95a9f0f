//! Builds the call tree from call/tail-call/return hook events and keeps
//! one [`CallState`] per coroutine. Shared by both profiling modes: the
//! allocation interceptor attributes its counters to whatever node
//! [`CpuTracer::current_node`] reports for the coroutine currently running.

use log::trace;

use crate::core::types::Prototype;
use crate::core::IntMap;
use crate::stack::CallState;
use crate::tree::{CallPathTree, NodeId};

pub struct CpuTracer<C> {
    states: IntMap<CallState<C>>,
}

impl<C: Copy + Into<u64>> CpuTracer<C> {
    pub fn new() -> Self {
        CpuTracer {
            states: IntMap::new(),
        }
    }

    fn state_mut(&mut self, coroutine: C) -> &mut CallState<C> {
        let key = coroutine.into();
        if !self.states.contains_key(key) {
            self.states.set(key, CallState::new(coroutine));
        }
        self.states.query_mut(key).expect("just inserted")
    }

    /// The call-tree node the coroutine's top-of-stack frame belongs to, or
    /// the tree root if the coroutine's stack is empty.
    pub fn current_node(&self, tree: &CallPathTree, coroutine: C) -> NodeId {
        let key = coroutine.into();
        self.states
            .query(key)
            .and_then(|state| state.top())
            .map(|frame| frame.node)
            .unwrap_or_else(|| tree.root())
    }

    /// Root-to-leaf node ids for the coroutine's current stack, for the
    /// sampling collector's folded-stack key.
    pub fn current_path(&self, tree: &CallPathTree, coroutine: C) -> Vec<NodeId> {
        tree.path_nodes(self.current_node(tree, coroutine))
    }

    pub fn on_call(
        &mut self,
        tree: &mut CallPathTree,
        coroutine: C,
        prototype: Prototype,
        now_ns: u64,
    ) -> NodeId {
        let parent = self.current_node(tree, coroutine);
        let node = tree.enter(parent, prototype);
        trace!("call {:?} -> node {:?}", prototype, node);
        self.state_mut(coroutine).on_call(prototype, node, now_ns);
        node
    }

    /// Tail calls fold into the caller's activation on the real VM, so a
    /// whole chain of them only ever produces one RETURN event. We model
    /// that by replacing the top-of-stack frame rather than growing it —
    /// and by resolving the child under the *caller's parent* rather than
    /// the caller itself, so self-tail-recursion (`f` tail-calling `f`)
    /// collapses onto a single call-path node instead of growing one node
    /// per recursion level.
    pub fn on_tail_call(
        &mut self,
        tree: &mut CallPathTree,
        coroutine: C,
        prototype: Prototype,
        now_ns: u64,
    ) -> NodeId {
        let state = self.state_mut(coroutine);
        let parent = state
            .top()
            .and_then(|f| tree.node(f.node).parent)
            .unwrap_or_else(|| tree.root());
        let node = tree.enter(parent, prototype);
        trace!("tail call {:?} -> node {:?}", prototype, node);
        self.state_mut(coroutine)
            .on_tail_call(prototype, node, now_ns);
        node
    }

    /// Pops the frame a RETURN event closes out and charges its self-time:
    /// `real = (now - call_time) - co_cost`, added to the node's
    /// `real_cost`. `now_ns >= call_time` and `total >= co_cost` always hold
    /// for a correctly-driven hook; violating either is a bug in the
    /// caller, not a recoverable condition.
    pub fn on_return(&mut self, tree: &mut CallPathTree, coroutine: C, now_ns: u64) {
        if let Some(frame) = self.state_mut(coroutine).on_return() {
            let total = now_ns
                .checked_sub(frame.call_time_ns)
                .expect("return observed before its call: clock or hook desynced");
            let real = total
                .checked_sub(frame.co_cost)
                .expect("yielded time exceeds total frame lifetime: hook desynced");
            trace!("return from node {:?} (+{}ns self)", frame.node, real);
            let node = tree.node_mut(frame.node);
            node.real_cost += real;
            node.last_return_time = now_ns;
        }
    }

    pub fn on_yield(&mut self, coroutine: C, now_ns: u64) {
        self.state_mut(coroutine).on_yield(now_ns);
    }

    pub fn on_resume(&mut self, coroutine: C, now_ns: u64) {
        self.state_mut(coroutine).on_resume(now_ns);
    }

    pub fn depth(&self, coroutine: C) -> usize {
        self.states
            .query(coroutine.into())
            .map(|s| s.depth())
            .unwrap_or(0)
    }
}

impl<C: Copy + Into<u64>> Default for CpuTracer<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_calls_from_one_coroutine_build_a_path() {
        let mut tree = CallPathTree::new();
        let mut tracer: CpuTracer<u64> = CpuTracer::new();
        let n1 = tracer.on_call(&mut tree, 0, Prototype(1), 0);
        let n2 = tracer.on_call(&mut tree, 0, Prototype(2), 1);
        assert_eq!(tree.node(n2).parent, Some(n1));
        assert_eq!(tracer.depth(0), 2);
        tracer.on_return(&mut tree, 0, 5);
        assert_eq!(tracer.depth(0), 1);
    }

    #[test]
    fn separate_coroutines_get_independent_stacks() {
        let mut tree = CallPathTree::new();
        let mut tracer: CpuTracer<u64> = CpuTracer::new();
        tracer.on_call(&mut tree, 0, Prototype(1), 0);
        tracer.on_call(&mut tree, 1, Prototype(2), 0);
        assert_eq!(tracer.depth(0), 1);
        assert_eq!(tracer.depth(1), 1);
    }

    #[test]
    fn return_charges_self_time_excluding_yielded_interval() {
        let mut tree = CallPathTree::new();
        let mut tracer: CpuTracer<u64> = CpuTracer::new();
        let node = tracer.on_call(&mut tree, 0, Prototype(1), 0);
        tracer.on_yield(0, 10);
        tracer.on_resume(0, 40); // 30ns charged to co_cost
        tracer.on_return(&mut tree, 0, 100);
        assert_eq!(tree.node(node).real_cost, 100 - 30);
    }

    #[test]
    fn self_tail_recursion_collapses_onto_one_node() {
        let mut tree = CallPathTree::new();
        let mut tracer: CpuTracer<u64> = CpuTracer::new();
        let initial = tracer.on_call(&mut tree, 0, Prototype(1), 0);
        for i in 0..1000u64 {
            let tail = tracer.on_tail_call(&mut tree, 0, Prototype(1), i + 1);
            assert_eq!(tail, initial, "self tail recursion must reuse one node");
        }
        assert_eq!(tree.node(initial).call_count, 1001);
        assert_eq!(tracer.depth(0), 1);
        tracer.on_return(&mut tree, 0, 2000);
        assert_eq!(tracer.depth(0), 0);
        assert!(tree.node(initial).real_cost > 0);
    }

    #[test]
    fn tail_call_to_a_different_function_is_a_sibling_of_the_original_call() {
        let mut tree = CallPathTree::new();
        let mut tracer: CpuTracer<u64> = CpuTracer::new();
        let f = tracer.on_call(&mut tree, 0, Prototype(1), 0);
        let g = tracer.on_tail_call(&mut tree, 0, Prototype(2), 5);
        assert_ne!(f, g);
        assert_eq!(tree.node(f).parent, tree.node(g).parent);
    }
}
