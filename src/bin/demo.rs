//! Drives a small synthetic workload through `TestVm` and dumps whatever
//! the profiler recorded. Stands in for the "command surface exposed to
//! scripts" a real embedding would provide: without a real interpreter to
//! attach to, this binary is the closest thing to an end-to-end demo the
//! crate can ship with.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use scriptprof::host::DebugInfo;
use scriptprof::{to_json, CpuMode, DumpPayload, MemMode, Options, Prototype, ProfilerSession, TestVm};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CpuArg {
    Off,
    Profile,
    Sample,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MemArg {
    Off,
    Profile,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Folded,
    Flamegraph,
    Summary,
}

/// Demo CLI for the in-process scripting-VM profiler.
///
/// `start` is the closest this detached binary can get to the embedding's
/// `start`/`dump` pair: without a real interpreter attached across separate
/// invocations, start-run-dump happens in one process lifetime. `sleep` and
/// `getnanosec` are the host-side time conveniences, exposed as their own
/// subcommands so they're independently testable from the shell.
#[derive(Parser, Debug)]
#[command(name = "scriptprof-demo", about = "Drives the profiler engine against a synthetic workload")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Starts a session, runs the synthetic workload, stops, and dumps.
    Start {
        #[arg(long, value_enum, default_value_t = CpuArg::Profile)]
        cpu: CpuArg,

        #[arg(long, value_enum, default_value_t = MemArg::Off)]
        mem: MemArg,

        #[arg(long, default_value_t = 1000)]
        sample_period: u64,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        /// Write the dump here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Repeat the synthetic workload this many times, so a longer demo
        /// run can be interrupted with Ctrl-C mid-way through.
        #[arg(long, default_value_t = 1)]
        iterations: u32,
    },
    /// POSIX-nanosleep-with-EINTR-retry over the given number of seconds.
    Sleep {
        seconds: f64,
    },
    /// Prints the current monotonic clock reading in nanoseconds.
    Getnanosec,
}

const FIB: Prototype = Prototype(1);
const WORK: Prototype = Prototype(2);
const ALLOC: Prototype = Prototype(3);

fn register_workload(vm: &mut TestVm) {
    vm.register_function(FIB, DebugInfo::script(Some("fib".to_string()), "demo.lua", 4));
    vm.register_function(WORK, DebugInfo::script(Some("work".to_string()), "demo.lua", 10));
    vm.register_function(ALLOC, DebugInfo::script(Some("allocate_buffers".to_string()), "demo.lua", 20));
}

/// One pass of a small synthetic call tree: `work` calls `fib` a few times
/// (self-recursive via tail calls, to exercise the tail-call-collapsing
/// path) and, in memory-profile mode, allocates and frees a couple of
/// buffers attributed to `allocate_buffers`.
fn run_workload<H: scriptprof::HostVm<CoroutineId = u64>>(
    session: &mut ProfilerSession<H>,
    host: &H,
    mut now_ns: u64,
) -> u64 {
    session.on_call(host, 0, WORK, now_ns);
    now_ns += 1_000;

    session.on_call(host, 0, FIB, now_ns);
    now_ns += 500;
    for _ in 0..5 {
        session.on_tail_call(host, 0, FIB, now_ns);
        now_ns += 200;
    }
    session.on_return(0, now_ns);
    now_ns += 100;

    session.on_call(host, 0, ALLOC, now_ns);
    session.on_alloc(0, 0x1000, 256);
    session.on_alloc(0, 0x2000, 128);
    session.on_free(0x1000);
    now_ns += 300;
    session.on_return(0, now_ns);
    now_ns += 50;

    session.on_return(0, now_ns);
    now_ns += 100;
    now_ns
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Sleep { seconds } => {
            scriptprof::time::sleep_seconds(seconds);
            Ok(())
        }
        Command::Getnanosec => {
            println!("{}", scriptprof::time::monotonic_now_ns());
            Ok(())
        }
        Command::Start {
            cpu,
            mem,
            sample_period,
            format,
            output,
            iterations,
        } => run_start(cpu, mem, sample_period, format, output, iterations),
    }
}

fn run_start(
    cpu: CpuArg,
    mem: MemArg,
    sample_period: u64,
    format: Format,
    output: Option<PathBuf>,
    iterations: u32,
) -> Result<()> {
    let cpu = match cpu {
        CpuArg::Off => CpuMode::Off,
        CpuArg::Profile => CpuMode::Profile,
        CpuArg::Sample => CpuMode::Sample,
    };
    let mem = match mem {
        MemArg::Off => MemMode::Off,
        MemArg::Profile => MemMode::Profile,
    };
    let options = Options {
        cpu,
        mem,
        sample_period,
    };

    let mut vm = TestVm::new();
    register_workload(&mut vm);

    let mut session: ProfilerSession<TestVm> = ProfilerSession::new();
    session.start(&mut vm, options).context("failed to start profiler session")?;
    session.mark(&vm, Some(0))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_handler = interrupted.clone();
    ctrlc::set_handler(move || {
        eprintln!("Interrupted, finishing current iteration and dumping what was collected.");
        interrupted_handler.store(true, Ordering::Relaxed);
    })
    .expect("Error setting Ctrl-C handler");

    let mut now_ns = 0u64;
    for _ in 0..iterations {
        if interrupted.load(Ordering::Relaxed) {
            break;
        }
        if cpu == CpuMode::Sample {
            vm.push_frame(WORK);
            vm.push_frame(FIB);
            session.on_count(&vm, 0, sample_period * 3);
            vm.pop_frame();
            vm.pop_frame();
        } else {
            now_ns = run_workload(&mut session, &vm, now_ns);
        }
    }

    let (_profile_duration_ns, payload) = session.dump(&mut vm).context("failed to dump profiler session")?;
    session.stop(&mut vm)?;

    let rendered = render(&session, &payload, format)?;
    match output {
        Some(path) => std::fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            std::io::stdout().write_all(rendered.as_bytes())?;
        }
    }
    Ok(())
}

fn render<H: scriptprof::HostVm>(session: &ProfilerSession<H>, payload: &DumpPayload, format: Format) -> Result<String> {
    match format {
        Format::Json => match payload {
            DumpPayload::Tree(dump) => Ok(to_json(dump)?),
            DumpPayload::Samples(samples) => Ok(serde_json::to_string_pretty(samples)?),
        },
        Format::Folded => Ok(session
            .sampler()
            .map(|s| s.folded_lines().join("\n"))
            .unwrap_or_default()),
        Format::Flamegraph => {
            let lines = session.sampler().map(|s| s.folded_lines()).unwrap_or_default();
            let stats = scriptprof::ui::flamegraph::Stats::new(lines);
            let mut buf = Vec::new();
            stats.write_flamegraph(&mut buf, 0.1)?;
            Ok(String::from_utf8(buf)?)
        }
        Format::Summary => {
            let stats = scriptprof::ui::summary::Stats::from_tree(session.tree());
            let mut buf = Vec::new();
            stats.write(&mut buf)?;
            Ok(String::from_utf8(buf)?)
        }
    }
}
