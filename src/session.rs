//! The profiler's lifecycle state machine and hook dispatch surface.
//!
//! `ProfilerSession` owns every other component in this crate and is the
//! only thing a host embedding talks to: a real binding calls `start`/
//! `stop`/`mark`/`unmark`/`dump` from script-facing entry points, and
//! forwards VM hook firings to `on_call`/`on_tail_call`/`on_return`/
//! `on_alloc`/`on_free`/`on_realloc`/`on_count`.
//!
//! Reentrancy is guarded by a single flag shared across every hook, the
//! same shape as the original's one `running_in_hook` field on its process-
//! wide context — the hooks themselves allocate (growing the IntMaps,
//! resolving symbols) and none of that should be mistaken for script-driven
//! activity.

use std::collections::HashSet;
use std::marker::PhantomData;

use log::debug;

use crate::allocator::MemoryAttributor;
use crate::core::types::Prototype;
use crate::error::{ProfileError, Result};
use crate::exporter::{dump_call_tree, dump_samples, DumpPayload};
use crate::host::HostVm;
use crate::options::{CpuMode, MemMode, Options};
use crate::sampler::CpuSampler;
use crate::symbol::SymbolTable;
use crate::time::monotonic_now_ns;
use crate::tracer::CpuTracer;
use crate::tree::CallPathTree;

/// Sample mode's stack walk is bounded the same way the call/return hook's
/// own per-coroutine stack is: a real VM never recurses this deep, so
/// exceeding it means the hook has desynced from the VM's own stack.
pub const MAX_SAMPLE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disabled,
    Arming,
    Active,
    Draining,
}

pub struct ProfilerSession<H: HostVm> {
    state: SessionState,
    options: Options,
    start_time_ns: u64,
    /// Cumulative hook self-overhead: `T' - T` summed across every
    /// call/return hook firing this session has processed.
    profile_cost_ns: u64,
    tree: CallPathTree,
    tracer: CpuTracer<H::CoroutineId>,
    symbols: SymbolTable,
    allocator: MemoryAttributor,
    sampler: Option<CpuSampler>,
    marked: HashSet<u64>,
    running_in_hook: bool,
    current: Option<H::CoroutineId>,
    /// `*const ()` is neither `Send` nor `Sync`, which makes this whole
    /// struct neither without relying on an unstable negative impl — the
    /// single-VM-thread assumption becomes a compile-time fact.
    _not_send_sync: PhantomData<*const ()>,
}

impl<H: HostVm> ProfilerSession<H> {
    pub fn new() -> Self {
        ProfilerSession {
            state: SessionState::Disabled,
            options: Options::default(),
            start_time_ns: 0,
            profile_cost_ns: 0,
            tree: CallPathTree::new(),
            tracer: CpuTracer::new(),
            symbols: SymbolTable::new(),
            allocator: MemoryAttributor::new(),
            sampler: None,
            marked: HashSet::new(),
            running_in_hook: false,
            current: None,
            _not_send_sync: PhantomData,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Validates `options`, installs the host's hooks, and resets every
    /// component to a blank session. Validation happens before any state is
    /// touched, so a rejected call leaves a running session untouched and a
    /// stopped one still stopped.
    ///
    /// A full GC runs first so pre-existing objects never contaminate
    /// memory attribution, and the collector is paused across hook
    /// installation itself so it can never observe a coroutine with some
    /// hooks installed and others not.
    pub fn start(&mut self, host: &mut H, options: Options) -> Result<()> {
        options.validate()?;
        if self.state != SessionState::Disabled {
            return Err(ProfileError::AlreadyStarted);
        }

        host.full_gc();

        self.state = SessionState::Arming;
        self.options = options;
        self.tree = CallPathTree::new();
        self.tracer = CpuTracer::new();
        self.symbols = SymbolTable::new();
        self.allocator = MemoryAttributor::new();
        self.marked.clear();
        self.current = None;
        self.running_in_hook = false;
        self.profile_cost_ns = 0;

        let now = monotonic_now_ns();
        self.sampler = match options.cpu {
            CpuMode::Sample => {
                let seed = now ^ (self as *const Self as u64);
                Some(CpuSampler::new(options.sample_period, seed))
            }
            _ => None,
        };

        host.stop_gc();
        host.install_hooks();
        host.start_gc();

        self.start_time_ns = now;
        self.state = SessionState::Active;
        debug!("profiler session started (cpu={:?} mem={:?})", options.cpu, options.mem);
        Ok(())
    }

    /// Tears the session down: swaps the allocator hook back, removes the
    /// call/return or count hooks from every coroutine, and clears the
    /// marked set. No GC runs here — a full collection only happens at
    /// `start` (to clear pre-existing attribution noise) and at `dump` (to
    /// settle live objects before the snapshot is taken).
    pub fn stop(&mut self, host: &mut H) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(ProfileError::NotStarted);
        }
        self.state = SessionState::Draining;
        host.remove_hooks();
        self.marked.clear();
        self.current = None;
        self.state = SessionState::Disabled;
        debug!("profiler session stopped");
        Ok(())
    }

    /// Snapshots the session for export. Runs a full GC and pauses the
    /// collector before building the payload, so a memory-profile dump
    /// reflects live objects rather than garbage awaiting collection and
    /// the GC never observes the tree mid-walk; restarts the collector
    /// before returning. Returns the wall-clock span since `start` alongside
    /// the payload, matching the embedding surface's `dump()` contract.
    pub fn dump(&mut self, host: &mut H) -> Result<(u64, DumpPayload)> {
        if self.state != SessionState::Active {
            return Err(ProfileError::NotStarted);
        }

        host.full_gc();
        host.stop_gc();

        let now = monotonic_now_ns();
        let profile_duration_ns = now.saturating_sub(self.start_time_ns);
        let payload = if self.options.cpu == CpuMode::Sample {
            let total_samples = self.sampler.as_ref().map(|s| s.total_samples()).unwrap_or(0);
            let lines = self.sampler.as_ref().map(|s| s.folded_lines()).unwrap_or_default();
            DumpPayload::Samples(dump_samples(total_samples, lines))
        } else {
            DumpPayload::Tree(dump_call_tree(&self.tree, &self.options, self.profile_cost_ns))
        };

        host.start_gc();
        Ok((profile_duration_ns, payload))
    }

    /// Installs attribution for one coroutine, or the host's current one if
    /// `coroutine` is omitted — the entry point a host binding calls for a
    /// fiber spawned after `start`.
    pub fn mark(&mut self, host: &H, coroutine: Option<H::CoroutineId>) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(ProfileError::NotStarted);
        }
        let id = coroutine.unwrap_or_else(|| host.current_coroutine());
        self.marked.insert(id.into());
        Ok(())
    }

    pub fn unmark(&mut self, host: &H, coroutine: Option<H::CoroutineId>) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(ProfileError::NotStarted);
        }
        let id = coroutine.unwrap_or_else(|| host.current_coroutine());
        self.marked.remove(&id.into());
        Ok(())
    }

    pub fn mark_all(&mut self, host: &H) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(ProfileError::NotStarted);
        }
        for coroutine in host.coroutines() {
            self.marked.insert(coroutine.into());
        }
        Ok(())
    }

    pub fn unmark_all(&mut self) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(ProfileError::NotStarted);
        }
        self.marked.clear();
        Ok(())
    }

    pub fn is_marked(&self, coroutine: H::CoroutineId) -> bool {
        self.marked.contains(&coroutine.into())
    }

    fn eligible(&self, coroutine: H::CoroutineId) -> bool {
        self.state == SessionState::Active
            && !self.running_in_hook
            && self.marked.contains(&coroutine.into())
    }

    /// There is no explicit yield/resume hook, so a coroutine switch is
    /// inferred purely from "the coroutine driving this event differs from
    /// the one that drove the last one." The previous coroutine is charged
    /// as yielded for the whole gap; the new one is resumed as of `now_ns`.
    fn note_coroutine_switch(&mut self, coroutine: H::CoroutineId, now_ns: u64) {
        if self.current != Some(coroutine) {
            if let Some(prev) = self.current {
                self.tracer.on_yield(prev, now_ns);
            }
            self.tracer.on_resume(coroutine, now_ns);
            self.current = Some(coroutine);
        }
    }

    /// Adds `T' - T` (monotonic time at hook exit minus the event's own
    /// timestamp) to the session's cumulative `profile_cost_ns`, the
    /// self-measurement of the hook's own overhead.
    fn charge_hook_overhead(&mut self, entry_ns: u64) {
        let exit_ns = monotonic_now_ns();
        self.profile_cost_ns = self.profile_cost_ns.saturating_add(exit_ns.saturating_sub(entry_ns));
    }

    pub fn on_call(&mut self, host: &H, coroutine: H::CoroutineId, prototype: Prototype, now_ns: u64) {
        if self.options.cpu != CpuMode::Profile || !self.eligible(coroutine) {
            return;
        }
        self.running_in_hook = true;
        self.note_coroutine_switch(coroutine, now_ns);
        let node = self.tracer.on_call(&mut self.tree, coroutine, prototype, now_ns);
        let symbol = self.symbols.resolve(host, coroutine, prototype).clone();
        self.tree.resolve(node, &symbol);
        self.charge_hook_overhead(now_ns);
        self.running_in_hook = false;
    }

    pub fn on_tail_call(&mut self, host: &H, coroutine: H::CoroutineId, prototype: Prototype, now_ns: u64) {
        if self.options.cpu != CpuMode::Profile || !self.eligible(coroutine) {
            return;
        }
        self.running_in_hook = true;
        self.note_coroutine_switch(coroutine, now_ns);
        let node = self
            .tracer
            .on_tail_call(&mut self.tree, coroutine, prototype, now_ns);
        let symbol = self.symbols.resolve(host, coroutine, prototype).clone();
        self.tree.resolve(node, &symbol);
        self.charge_hook_overhead(now_ns);
        self.running_in_hook = false;
    }

    pub fn on_return(&mut self, coroutine: H::CoroutineId, now_ns: u64) {
        if self.options.cpu != CpuMode::Profile || !self.eligible(coroutine) {
            return;
        }
        self.running_in_hook = true;
        self.note_coroutine_switch(coroutine, now_ns);
        self.tracer.on_return(&mut self.tree, coroutine, now_ns);
        self.charge_hook_overhead(now_ns);
        self.running_in_hook = false;
    }

    /// The node a fresh allocation or the live end of a realloc should be
    /// attributed to: the current leaf of whichever coroutine is running,
    /// or the tree root if CPU tracing isn't active for it (memory
    /// profiling works independently of CPU profiling).
    fn current_owner(&self, coroutine: H::CoroutineId) -> crate::tree::NodeId {
        self.tracer.current_node(&self.tree, coroutine)
    }

    pub fn on_alloc(&mut self, coroutine: H::CoroutineId, addr: u64, size: usize) {
        if self.options.mem != MemMode::Profile
            || self.state != SessionState::Active
            || self.running_in_hook
        {
            return;
        }
        self.running_in_hook = true;
        let owner = self.current_owner(coroutine);
        self.allocator.on_alloc(&mut self.tree, addr, size, owner);
        self.running_in_hook = false;
    }

    pub fn on_free(&mut self, addr: u64) {
        if self.options.mem != MemMode::Profile
            || self.state != SessionState::Active
            || self.running_in_hook
        {
            return;
        }
        self.running_in_hook = true;
        self.allocator.on_free(&mut self.tree, addr);
        self.running_in_hook = false;
    }

    pub fn on_realloc(&mut self, coroutine: H::CoroutineId, old_addr: u64, new_addr: u64, new_size: usize) {
        if self.options.mem != MemMode::Profile
            || self.state != SessionState::Active
            || self.running_in_hook
        {
            return;
        }
        self.running_in_hook = true;
        let owner = self.current_owner(coroutine);
        self.allocator
            .on_realloc(&mut self.tree, old_addr, new_addr, new_size, owner);
        self.running_in_hook = false;
    }

    /// Drives the sampling collector from a VM instruction-count hook.
    /// Sample mode never touches the call-path tree, so the folded-stack
    /// key is built directly from the host's live debug stack rather than
    /// from anything this session has recorded.
    pub fn on_count(&mut self, host: &H, coroutine: H::CoroutineId, instructions: u64) {
        if self.options.cpu != CpuMode::Sample || !self.eligible(coroutine) {
            return;
        }
        self.running_in_hook = true;
        let stack = host.debug_frames(coroutine);
        assert!(
            stack.len() <= MAX_SAMPLE_DEPTH,
            "sample stack exceeded {} frames; hook state has desynced from the VM stack",
            MAX_SAMPLE_DEPTH
        );
        // Resolved eagerly, once per hook firing, rather than inside the
        // sampler's key closure: `CpuSampler::on_count` may call that
        // closure several times per batch, and symbol resolution needs a
        // `&mut SymbolTable` that an `Fn` closure can't reborrow. Each
        // symbol is formatted as `"<name> <source>:<line>"` so two
        // different functions that happen to share a fallback name (two
        // distinct anonymous closures, say) never collapse onto one key.
        // The path always starts at the synthetic "root" segment, the same
        // sentinel `CallPathTree` roots its call-tracing tree under, so a
        // sampled path and a traced path agree on where "the top" is even
        // though sample mode never builds a tree of its own.
        let key: String = std::iter::once("root".to_string())
            .chain(
                stack
                    .iter()
                    .map(|f| self.symbols.resolve(host, coroutine, f.prototype).to_string()),
            )
            .collect::<Vec<_>>()
            .join(";");
        if let Some(sampler) = self.sampler.as_mut() {
            sampler.on_count(instructions, || key.clone());
        }
        self.running_in_hook = false;
    }

    pub fn tree(&self) -> &CallPathTree {
        &self.tree
    }

    pub fn sampler(&self) -> Option<&CpuSampler> {
        self.sampler.as_ref()
    }

    pub fn start_time_ns(&self) -> u64 {
        self.start_time_ns
    }

    pub fn profile_cost_ns(&self) -> u64 {
        self.profile_cost_ns
    }
}

impl<H: HostVm> Default for ProfilerSession<H> {
    fn default() -> Self {
        Self::new()
    }
}
