//! The seam between the engine and a real VM embedding.
//!
//! Binding this crate to an actual interpreter (walking its native call
//! stack, swapping its allocator, installing its instruction-count hook) is
//! explicitly out of scope: every concrete VM exposes that plumbing
//! differently. [`HostVm`] names the handful of queries the engine needs
//! from *any* such embedding, and [`TestVm`] is a deterministic stand-in
//! that drives the engine from tests and the demo binary.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use crate::core::types::Prototype;

/// Debug info the host can report about a callable, analogous to what
/// `lua_getinfo("Snl", ...)` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    pub is_native: bool,
    pub name: Option<String>,
    pub source: Option<String>,
    pub linedefined: i64,
}

impl DebugInfo {
    pub fn native(name: impl Into<String>) -> Self {
        DebugInfo {
            is_native: true,
            name: Some(name.into()),
            source: None,
            linedefined: 0,
        }
    }

    pub fn script(name: Option<String>, source: impl Into<String>, linedefined: i64) -> Self {
        DebugInfo {
            is_native: false,
            name,
            source: Some(source.into()),
            linedefined,
        }
    }
}

/// One live frame on a coroutine's debug stack, analogous to what
/// `lua_getstack`/`lua_getinfo("Sl", ...)` reports for a single activation
/// record: which callable is running, whether it's a native ('C') frame,
/// and where execution currently sits within it. Distinct from [`DebugInfo`]
/// — that's per-*callable* metadata (defining line, declared name), this is
/// per-*activation* position, which is what a native frame borrows from its
/// nearest enclosing script frame when it has no line of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub prototype: Prototype,
    pub is_native: bool,
    pub current_line: i64,
    pub source: Option<String>,
}

/// Everything the engine needs to pull from a concrete VM embedding.
///
/// A real binding implements this over the interpreter's C API; [`TestVm`]
/// implements it over a small in-memory model for tests and the demo.
pub trait HostVm {
    /// Opaque identity for a coroutine (thread, fiber) the VM schedules.
    /// `Into<u64>` lets the engine key its per-coroutine state off the same
    /// [`crate::core::IntMap`] it uses everywhere else a VM pointer is the
    /// natural key.
    type CoroutineId: Copy + Eq + Hash + Debug + Into<u64>;

    /// The coroutine currently running script code.
    fn current_coroutine(&self) -> Self::CoroutineId;

    /// Every coroutine presently alive, for `mark_all`/`unmark_all`.
    fn coroutines(&self) -> Vec<Self::CoroutineId>;

    /// Resolves debug info for a callable the engine has not seen before.
    /// Looked up once per [`Prototype`] and memoized by the symbol table.
    fn debug_info(&self, prototype: Prototype) -> DebugInfo;

    /// Installs the call/return/count hooks and the allocator interceptor.
    fn install_hooks(&mut self);

    /// Tears down whatever `install_hooks` put in place.
    fn remove_hooks(&mut self);

    /// Runs a full collection cycle. The original implementation triggers
    /// one before an allocation-mode dump so the snapshot reflects live
    /// objects rather than garbage awaiting collection.
    fn full_gc(&mut self);

    /// Pauses the collector. Bracketed around hook installation and around
    /// a dump snapshot so the GC never observes either half-installed hooks
    /// or a call tree mid-walk.
    fn stop_gc(&mut self);

    /// Resumes a collector paused by [`HostVm::stop_gc`].
    fn start_gc(&mut self);

    /// The coroutine's live debug stack, outermost frame first, as the VM's
    /// own debug API reports it right now. Used in two places: sample mode,
    /// which never drives the call/return hook and so has no call-path tree
    /// of its own to consult and must ask the host directly (the way the
    /// original samples `lua_getstack`/`lua_getinfo` on a count hook); and
    /// symbol resolution for a native frame, which walks this stack outward
    /// looking for the nearest enclosing non-native frame to borrow a
    /// current line/source from.
    fn debug_frames(&self, coroutine: Self::CoroutineId) -> Vec<FrameInfo>;
}

/// Deterministic [`HostVm`] used by the test suite and the demo binary.
/// Coroutines and callables are registered explicitly rather than
/// discovered by walking a real interpreter's stack.
#[derive(Default)]
pub struct TestVm {
    current: u64,
    coroutines: HashSet<u64>,
    debug_info: HashMap<u64, DebugInfo>,
    hooks_installed: bool,
    gc_runs: u64,
    gc_stopped: bool,
    /// Explicit per-coroutine debug stacks, outermost first. Driven by
    /// [`TestVm::push_frame`]/[`TestVm::push_frame_at`]/[`TestVm::pop_frame`]
    /// rather than by the engine's own tracer, standing in for a real VM's
    /// live debug stack.
    frames: HashMap<u64, Vec<FrameInfo>>,
}

impl TestVm {
    pub fn new() -> Self {
        let mut vm = TestVm {
            current: 0,
            coroutines: HashSet::new(),
            debug_info: HashMap::new(),
            hooks_installed: false,
            gc_runs: 0,
            gc_stopped: false,
            frames: HashMap::new(),
        };
        vm.coroutines.insert(0);
        vm.frames.insert(0, Vec::new());
        vm
    }

    pub fn register_function(&mut self, prototype: Prototype, info: DebugInfo) {
        self.debug_info.insert(prototype.as_u64(), info);
    }

    pub fn spawn_coroutine(&mut self, id: u64) {
        self.coroutines.insert(id);
        self.frames.entry(id).or_default();
    }

    pub fn switch_to(&mut self, id: u64) {
        assert!(
            self.coroutines.contains(&id),
            "switched to an unregistered coroutine"
        );
        self.current = id;
    }

    pub fn hooks_installed(&self) -> bool {
        self.hooks_installed
    }

    pub fn gc_runs(&self) -> u64 {
        self.gc_runs
    }

    pub fn gc_stopped(&self) -> bool {
        self.gc_stopped
    }

    fn frame_for(&self, prototype: Prototype, current_line: i64) -> FrameInfo {
        let info = self
            .debug_info
            .get(&prototype.as_u64())
            .cloned()
            .unwrap_or_else(|| DebugInfo::native(format!("cfunc@{:#x}", prototype.as_u64())));
        FrameInfo {
            prototype,
            is_native: info.is_native,
            current_line,
            source: info.source,
        }
    }

    /// Pushes a frame onto the current coroutine's live stack, for tests
    /// that need `debug_frames` to reflect calls the profiler's own
    /// call/return hook never observes (sample mode), or the enclosing
    /// frames a native call's symbol resolution walks outward through.
    /// The frame's current line defaults to the callable's defining line
    /// (0 for a native callable); use [`TestVm::push_frame_at`] to give a
    /// script frame a current line that differs from where it was defined.
    pub fn push_frame(&mut self, prototype: Prototype) {
        let linedefined = self
            .debug_info
            .get(&prototype.as_u64())
            .map(|info| info.linedefined)
            .unwrap_or(0);
        let frame = self.frame_for(prototype, linedefined);
        self.frames.entry(self.current).or_default().push(frame);
    }

    /// Like [`TestVm::push_frame`], but with an explicit current line —
    /// the execution position a native callee frame borrows when it walks
    /// outward looking for an enclosing script frame.
    pub fn push_frame_at(&mut self, prototype: Prototype, current_line: i64) {
        let frame = self.frame_for(prototype, current_line);
        self.frames.entry(self.current).or_default().push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.entry(self.current).or_default().pop();
    }
}

impl HostVm for TestVm {
    type CoroutineId = u64;

    fn current_coroutine(&self) -> u64 {
        self.current
    }

    fn coroutines(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.coroutines.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn debug_info(&self, prototype: Prototype) -> DebugInfo {
        self.debug_info
            .get(&prototype.as_u64())
            .cloned()
            .unwrap_or_else(|| DebugInfo::native(format!("cfunc@{:#x}", prototype.as_u64())))
    }

    fn install_hooks(&mut self) {
        self.hooks_installed = true;
    }

    fn remove_hooks(&mut self) {
        self.hooks_installed = false;
    }

    fn full_gc(&mut self) {
        self.gc_runs += 1;
    }

    fn stop_gc(&mut self) {
        self.gc_stopped = true;
    }

    fn start_gc(&mut self) {
        self.gc_stopped = false;
    }

    fn debug_frames(&self, coroutine: u64) -> Vec<FrameInfo> {
        self.frames.get(&coroutine).cloned().unwrap_or_default()
    }
}
