//! A single coroutine's live call stack, and the accounting it carries:
//! tail calls collapse so a chain of them costs one stack slot instead of
//! one per call, and time spent suspended while yielded is distributed
//! across every frame still on the stack when the coroutine resumes.

use crate::core::types::Prototype;
use crate::tree::NodeId;

/// Matches the original's fixed-size per-coroutine stack. A real VM bounds
/// recursion depth well below this; exceeding it means the hook logic lost
/// sync with the VM's own stack, which is an invariant violation, not a
/// recoverable condition.
pub const MAX_STACK_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub prototype: Prototype,
    pub node: NodeId,
    pub is_tail_call: bool,
    pub call_time_ns: u64,
    pub co_cost: u64,
}

pub struct CallState<C> {
    pub coroutine: C,
    frames: Vec<CallFrame>,
    leave_time_ns: Option<u64>,
}

impl<C: Copy> CallState<C> {
    pub fn new(coroutine: C) -> Self {
        CallState {
            coroutine,
            frames: Vec::with_capacity(64),
            leave_time_ns: None,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Pushes a normal (non-tail) call frame.
    pub fn on_call(&mut self, prototype: Prototype, node: NodeId, now_ns: u64) {
        assert!(
            self.frames.len() < MAX_STACK_DEPTH,
            "call stack exceeded {} frames; hook state has desynced from the VM stack",
            MAX_STACK_DEPTH
        );
        self.frames.push(CallFrame {
            prototype,
            node,
            is_tail_call: false,
            call_time_ns: now_ns,
            co_cost: 0,
        });
    }

    /// A tail call reuses the caller's stack slot: the VM will only ever
    /// emit one RETURN event for the whole tail chain, so this replaces the
    /// top frame in place instead of growing the stack.
    pub fn on_tail_call(&mut self, prototype: Prototype, node: NodeId, now_ns: u64) {
        self.frames.pop();
        assert!(
            self.frames.len() < MAX_STACK_DEPTH,
            "call stack exceeded {} frames; hook state has desynced from the VM stack",
            MAX_STACK_DEPTH
        );
        self.frames.push(CallFrame {
            prototype,
            node,
            is_tail_call: true,
            call_time_ns: now_ns,
            co_cost: 0,
        });
    }

    /// Pops the frame a RETURN event closes out.
    pub fn on_return(&mut self) -> Option<CallFrame> {
        self.frames.pop()
    }

    /// Marks the coroutine as suspended as of `now_ns`.
    pub fn on_yield(&mut self, now_ns: u64) {
        self.leave_time_ns = Some(now_ns);
    }

    /// Charges the time spent suspended to every frame still live on the
    /// stack, then clears the suspension marker.
    pub fn on_resume(&mut self, now_ns: u64) {
        if let Some(left_at) = self.leave_time_ns.take() {
            let cost = now_ns.saturating_sub(left_at);
            for frame in &mut self.frames {
                frame.co_cost += cost;
            }
        }
    }
}
