//! In-process call-tree and allocation profiler for embedded stack-based
//! scripting runtimes.
//!
//! The engine never talks to a real interpreter directly — [`host::HostVm`]
//! is the seam a concrete embedding implements, and [`session::ProfilerSession`]
//! is the state machine every script-facing `start`/`stop`/`mark`/`dump`
//! entry point forwards into. This crate never initializes a logger itself
//! (see the demo binary for that) and never touches stdout/stderr outside
//! of `ui::flamegraph`/`ui::summary`'s explicit write calls.

pub mod allocator;
pub mod core;
pub mod error;
pub mod exporter;
pub mod host;
pub mod options;
pub mod sampler;
pub mod session;
pub mod stack;
pub mod symbol;
pub mod time;
pub mod tracer;
pub mod tree;
pub mod ui;

pub use core::{IntMap, Prototype, StrMap, SymbolInfo};
pub use error::{ProfileError, Result};
pub use exporter::{dump_call_tree, dump_samples, to_json, CallTreeDump, DumpNode, DumpPayload, SampleDump};
pub use host::{DebugInfo, HostVm, TestVm};
pub use options::{CpuMode, MemMode, Options};
pub use session::ProfilerSession;
pub use tree::{CallPathNode, CallPathTree, NodeId, NodeTotals};

/// End-to-end scenarios driving `ProfilerSession` against `TestVm`,
/// exercising the behaviors a real embedding's hook plumbing is expected to
/// preserve: distinct call paths never merge, self-recursive tail calls
/// collapse onto one node, yielded time is excluded from self-cost, frees
/// credit the allocating node rather than whoever's running, realloc churn
/// keeps alloc/free/realloc counters distinct, and sample mode exports
/// folded stacks without ever touching the call-path tree.
#[cfg(test)]
mod session_scenarios {
    use std::io::Write;

    use crate::host::DebugInfo;
    use crate::{to_json, CpuMode, MemMode, Options, ProfilerSession, Prototype, TestVm};

    fn vm() -> TestVm {
        TestVm::new()
    }

    #[test]
    fn sibling_call_paths_never_merge() {
        let mut vm = vm();
        vm.register_function(Prototype(1), DebugInfo::script(Some("a".into()), "m.lua", 1));
        vm.register_function(Prototype(2), DebugInfo::script(Some("b".into()), "m.lua", 2));
        vm.register_function(Prototype(3), DebugInfo::script(Some("c".into()), "m.lua", 3));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        session.start(&mut vm, Options::default()).unwrap();
        session.mark(&vm, Some(0)).unwrap();

        // a -> b -> c, and separately a -> c: `c` must be two distinct nodes.
        session.on_call(&vm, 0, Prototype(1), 0);
        session.on_call(&vm, 0, Prototype(2), 1);
        session.on_call(&vm, 0, Prototype(3), 2);
        session.on_return(0, 3); // c under b returns
        session.on_return(0, 4); // b returns
        session.on_call(&vm, 0, Prototype(3), 5); // c directly under a
        session.on_return(0, 6);
        session.on_return(0, 7); // a returns

        let root = session.tree().root();
        let a = session.tree().children(root)[0];
        let a_children = session.tree().children(a);
        assert_eq!(a_children.len(), 2, "a should have two distinct children: b and c");

        let b = a_children
            .iter()
            .copied()
            .find(|&id| session.tree().node(id).name.as_deref() == Some("b"))
            .unwrap();
        let c_under_b = session.tree().children(b);
        assert_eq!(c_under_b.len(), 1);
        let c_under_a = a_children
            .iter()
            .copied()
            .find(|&id| session.tree().node(id).name.as_deref() == Some("c"))
            .unwrap();
        assert_ne!(c_under_a, c_under_b[0], "c under a and c under b must be distinct nodes");
    }

    #[test]
    fn self_tail_recursion_collapses_to_one_node_with_call_count_1001() {
        let mut vm = vm();
        vm.register_function(Prototype(1), DebugInfo::script(Some("loop".into()), "m.lua", 1));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        session.start(&mut vm, Options::default()).unwrap();
        session.mark(&vm, Some(0)).unwrap();

        session.on_call(&vm, 0, Prototype(1), 0);
        let mut now = 1u64;
        for _ in 0..1000 {
            session.on_tail_call(&vm, 0, Prototype(1), now);
            now += 1;
        }
        session.on_return(0, now);

        let root = session.tree().root();
        let children = session.tree().children(root);
        assert_eq!(children.len(), 1, "self tail recursion must stay a single node");
        assert_eq!(session.tree().node(children[0]).call_count, 1001);
    }

    #[test]
    fn yielded_interval_is_excluded_from_self_cost() {
        let mut vm = vm();
        vm.spawn_coroutine(1);
        vm.register_function(Prototype(1), DebugInfo::script(Some("f".into()), "m.lua", 1));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        session.start(&mut vm, Options::default()).unwrap();
        session.mark(&vm, Some(0)).unwrap();
        session.mark(&vm, Some(1)).unwrap();

        // Coroutine 0 calls `f` at t=0. The VM then switches to coroutine 1,
        // which also calls `f` (the same call-path node: node identity comes
        // from (parent, prototype), not from which coroutine is running) and
        // returns at t=1000. Switching back to coroutine 0 charges it for the
        // 990ns it sat yielded, so its own return at t=1100 only contributes
        // 10ns of self-time — not the full 1100ns span.
        session.on_call(&vm, 0, Prototype(1), 0);
        session.on_call(&vm, 1, Prototype(1), 10);
        session.on_return(1, 1000);
        session.on_return(0, 1100);

        let root = session.tree().root();
        let f = session.tree().children(root)[0];
        assert_eq!(session.tree().node(f).call_count, 2);
        // coroutine 1's frame: 1000 - 10 = 990ns self-time, no yield.
        // coroutine 0's frame: 1100 - 0 = 1100ns total, minus 1090ns yielded
        // while coroutine 1 ran = 10ns self-time. Shared node totals 1000.
        assert_eq!(session.tree().node(f).real_cost, 1000);
    }

    #[test]
    fn free_is_attributed_to_the_allocating_node_not_the_current_one() {
        let mut vm = vm();
        vm.register_function(Prototype(1), DebugInfo::script(Some("alloc_here".into()), "m.lua", 1));
        vm.register_function(Prototype(2), DebugInfo::script(Some("free_here".into()), "m.lua", 2));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        let options = Options {
            mem: MemMode::Profile,
            ..Options::default()
        };
        session.start(&mut vm, options).unwrap();
        session.mark(&vm, Some(0)).unwrap();

        session.on_call(&vm, 0, Prototype(1), 0);
        session.on_alloc(0, 0x1000, 64);
        session.on_return(0, 1);

        session.on_call(&vm, 0, Prototype(2), 2);
        session.on_free(0x1000);
        session.on_return(0, 3);

        let root = session.tree().root();
        let children = session.tree().children(root);
        let alloc_node = children
            .iter()
            .copied()
            .find(|&id| session.tree().node(id).name.as_deref() == Some("alloc_here"))
            .unwrap();
        let free_node = children
            .iter()
            .copied()
            .find(|&id| session.tree().node(id).name.as_deref() == Some("free_here"))
            .unwrap();

        assert_eq!(session.tree().node(alloc_node).alloc_bytes, 64);
        assert_eq!(session.tree().node(alloc_node).free_bytes, 64);
        assert_eq!(session.tree().node(alloc_node).free_times, 1);
        assert_eq!(session.tree().node(free_node).free_times, 0, "the freeing path gets no credit");
    }

    #[test]
    fn realloc_churn_keeps_alloc_free_and_realloc_counters_distinct() {
        let mut vm = vm();
        vm.register_function(Prototype(1), DebugInfo::script(Some("grow".into()), "m.lua", 1));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        let options = Options {
            mem: MemMode::Profile,
            ..Options::default()
        };
        session.start(&mut vm, options).unwrap();
        session.mark(&vm, Some(0)).unwrap();

        session.on_call(&vm, 0, Prototype(1), 0);
        session.on_alloc(0, 0x10, 64);
        session.on_realloc(0, 0x10, 0x20, 128);
        session.on_realloc(0, 0x20, 0x30, 256);
        session.on_realloc(0, 0x30, 0x40, 512);
        session.on_return(0, 10);

        let node = session.tree().node(session.tree().children(session.tree().root())[0]);
        assert_eq!(node.alloc_bytes, 64 + 128 + 256 + 512);
        assert_eq!(node.free_bytes, 64 + 128 + 256);
        assert_eq!(node.alloc_times, 1);
        assert_eq!(node.free_times, 0);
        assert_eq!(node.realloc_times, 3);
        assert_eq!(node.inuse_bytes(), 512);
    }

    #[test]
    fn sample_mode_exports_folded_stacks_without_touching_the_call_tree() {
        let mut vm = vm();
        vm.register_function(Prototype(1), DebugInfo::script(Some("outer".into()), "m.lua", 1));
        vm.register_function(Prototype(2), DebugInfo::script(Some("inner".into()), "m.lua", 2));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        let options = Options {
            cpu: CpuMode::Sample,
            sample_period: 100,
            ..Options::default()
        };
        session.start(&mut vm, options).unwrap();
        session.mark(&vm, Some(0)).unwrap();

        vm.push_frame(Prototype(1));
        vm.push_frame(Prototype(2));
        session.on_count(&vm, 0, 10_000);

        // Sample mode never drives the call/return hook: the tree stays just
        // the synthetic root no matter how many samples fired.
        assert_eq!(session.tree().len(), 1);
        let samples = session.sampler().unwrap().total_samples();
        assert!(samples > 0);
        let lines = session.sampler().unwrap().folded_lines();
        // Each symbol in the folded key is "<name> <source>:<line>", not just
        // its bare name, so two functions sharing a fallback name in different
        // files never collapse onto the same folded path.
        assert!(lines.iter().any(|l| l.starts_with("root;outer m.lua:1;inner m.lua:2 ")));
    }

    #[test]
    fn dump_survives_a_round_trip_through_json_on_disk() {
        let mut vm = vm();
        vm.register_function(Prototype(1), DebugInfo::script(Some("f".into()), "m.lua", 1));

        let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
        session.start(&mut vm, Options::default()).unwrap();
        session.mark(&vm, Some(0)).unwrap();
        session.on_call(&vm, 0, Prototype(1), 0);
        session.on_return(0, 42);

        let (duration, payload) = session.dump(&mut vm).unwrap();
        assert!(duration < u64::MAX);
        let dump = match payload {
            crate::DumpPayload::Tree(dump) => dump,
            crate::DumpPayload::Samples(_) => panic!("profile mode must dump a tree"),
        };
        session.stop(&mut vm).unwrap();

        let json = to_json(&dump).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let read_back = std::fs::read_to_string(file.path()).unwrap();
        let reparsed: serde_json::Value = serde_json::from_str(&read_back).unwrap();
        assert_eq!(reparsed["root"]["children"][0]["name"], "f m.lua:1");
        assert_eq!(reparsed["root"]["children"][0]["cpu_cost_ns"], 42);
    }
}
