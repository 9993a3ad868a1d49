#![warn(missing_docs)]
//! rankbench CLI
//!
//! Entry-point wiring for the `rankbench` binary: argument parsing, config
//! discovery, the orchestrator loop that feeds challengers through the
//! benchmark pipeline, and the human-readable run log.
//!
//! ```text
//! challenger paths ──► load ──► ruggedness ──► points ──► queries ──► release
//!                        │          │             │          │
//!                        └──────────┴─── failures ┴──────────┘
//!                                        │
//!                                        ▼
//!                                   Scoreboard (crashes last)
//! ```

mod config;
mod supervisor;

pub use config::*;
pub use supervisor::*;

use clap::{ArgAction, CommandFactory, Parser};
use rankbench_core::{
    run_pipeline, Challenger, ChallengerModule, ChallengerResult, HighResTimer, LoadError,
    PipelineOutcome, Scoreboard, Seed, Workload, WorkerMain, CRASHED_TIME,
};
use rankbench_ipc::{Phase, WorkloadSpec};
use std::path::PathBuf;
use std::time::Duration;

/// rankbench command-line arguments.
///
/// Short numeric flags accept attached values (`-p10000000`) for parity
/// with the classic harness invocation style.
#[derive(Parser, Debug)]
#[command(name = "rankbench")]
#[command(
    about = "Given ranked points on a plane, find the most important points inside \
             query rectangles. Challenger modules solving this are timed, memory-profiled, \
             crash-isolated, and ranked."
)]
pub struct Cli {
    /// Challenger module paths (shared libraries exporting create/search/destroy)
    pub challengers: Vec<PathBuf>,

    /// Point count
    #[arg(short = 'p', long = "points")]
    pub points: Option<u32>,

    /// Query count
    #[arg(short = 'q', long = "queries")]
    pub queries: Option<u32>,

    /// Result count (top-k per query)
    #[arg(short = 'r', long = "results")]
    pub results: Option<u32>,

    /// Explicit random seed (recognized; reproducible runs are not wired up yet)
    #[arg(short = 's', long = "seed")]
    pub seed: Option<String>,

    /// Run each challenger in an isolated worker process
    #[arg(long, action = ArgAction::Set)]
    pub isolated: Option<bool>,

    /// Per-stage deadline in seconds; a stalled stage counts as a crash
    #[arg(long)]
    pub stage_timeout: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: run as worker process (used by the supervisor)
    #[arg(long, hide = true)]
    pub bench_worker: bool,
}

/// Run the rankbench CLI. This is the binary's whole entry point.
pub fn run() -> anyhow::Result<()> {
    run_with_cli(Cli::parse())
}

/// Run with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Worker mode first, before any other initialization.
    if cli.bench_worker {
        return run_worker_mode();
    }

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("rankbench=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("rankbench=info")
            .init();
    }

    let config = RankbenchConfig::discover().unwrap_or_default();

    if cli.challengers.is_empty() {
        // No challengers means nothing to rank; usage and a non-zero exit.
        let _ = Cli::command().print_help();
        println!();
        std::process::exit(1);
    }

    print_welcome();

    if let Some(seed_arg) = &cli.seed {
        // Recognized but deferred, exactly like the classic harness.
        println!("-s {seed_arg}: seed option not yet supported; using a random seed.\n");
    }

    let seed = Seed::random();
    let spec = WorkloadSpec {
        point_count: cli.points.unwrap_or(config.workload.points),
        query_count: cli.queries.unwrap_or(config.workload.queries),
        result_count: cli.results.unwrap_or(config.workload.results),
        seed: seed.0,
    };
    print_options(&spec, seed);

    let isolated = cli.isolated.unwrap_or(config.runner.isolated);
    let stage_timeout = Duration::from_secs(
        cli.stage_timeout
            .unwrap_or(config.runner.stage_timeout_secs)
            .max(1),
    );

    let mut scoreboard = Scoreboard::new();

    if isolated {
        run_isolated(&cli.challengers, &spec, stage_timeout, &mut scoreboard);
    } else {
        run_in_process(&cli.challengers, &spec, seed, &mut scoreboard);
    }

    if scoreboard.is_empty() {
        eprintln!("\nNo challengers could be loaded.");
        let _ = Cli::command().print_help();
        println!();
        std::process::exit(1);
    }

    print_scoreboard(scoreboard);
    Ok(())
}

/// Run as a worker process (IPC mode).
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new();
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("worker error: {e}"))
}

/// Isolated mode: one fresh worker process per challenger, stage deadlines
/// armed. A native crash or a hang costs only its own challenger.
fn run_isolated(
    challengers: &[PathBuf],
    spec: &WorkloadSpec,
    stage_timeout: Duration,
    scoreboard: &mut Scoreboard,
) {
    let supervisor = Supervisor::new(spec.clone(), stage_timeout);

    for (index, path) in challengers.iter().enumerate() {
        let name = path.display().to_string();
        println!("\nTesting challenger #{index} ({name}):");

        let verdict = supervisor.run_challenger(&name, &mut |phase, elapsed_ms| {
            print_phase(phase, elapsed_ms, spec.query_count);
        });

        match verdict {
            ChallengerVerdict::Completed {
                search_ms,
                memory_mb,
                destroy_clean,
                contract_violations,
                ..
            } => {
                record_completed(
                    scoreboard,
                    name,
                    search_ms,
                    memory_mb,
                    destroy_clean,
                    contract_violations,
                );
            }
            ChallengerVerdict::ExcludedLoad { message } => {
                println!("Loading module... failed: {message}");
                println!("{name} excluded from the run.");
            }
            ChallengerVerdict::Crashed { phase, message } => {
                record_crashed(scoreboard, name, phase, &message);
            }
        }
    }
}

/// Legacy in-process mode: every challenger shares this process and the
/// generated workload; only unwind-style faults are survivable.
fn run_in_process(
    challengers: &[PathBuf],
    spec: &WorkloadSpec,
    seed: Seed,
    scoreboard: &mut Scoreboard,
) {
    println!("\nLoading challengers:");
    let mut loaded: Vec<ChallengerModule> = Vec::new();
    for path in challengers {
        match ChallengerModule::load(path) {
            Ok(module) => {
                println!("Loading {}... Success.", path.display());
                loaded.push(module);
            }
            Err(e @ LoadError::Open { .. }) => {
                println!("Loading {}... Not Found. ({e})", path.display());
            }
            Err(e) => {
                println!("Loading {}... Not a valid module. ({e})", path.display());
            }
        }
    }
    println!("{} challengers loaded.", loaded.len());
    if loaded.is_empty() {
        return;
    }

    let mut timer = HighResTimer::start_new();
    let workload = Workload::generate(
        spec.point_count,
        spec.query_count,
        spec.result_count,
        seed,
    );
    println!(
        "Preparing {} random points and {} queries... done ({:.4}ms).",
        spec.point_count,
        spec.query_count,
        timer.elapsed()
    );

    for (index, module) in loaded.iter_mut().enumerate() {
        let name = module.name().to_string();
        println!("\nTesting challenger #{index} ({name}):");

        let outcome = run_pipeline(module, &workload, &mut |event| {
            print_phase(event.phase, event.elapsed_ms, spec.query_count);
        });

        match outcome {
            PipelineOutcome::Completed {
                search_ms,
                memory_mb,
                destroy_clean,
                contract_violations,
                ..
            } => {
                record_completed(
                    scoreboard,
                    name,
                    search_ms,
                    memory_mb,
                    destroy_clean,
                    contract_violations,
                );
            }
            PipelineOutcome::Faulted { phase, message } => {
                record_crashed(scoreboard, name, phase, &message);
            }
        }
    }
}

fn record_completed(
    scoreboard: &mut Scoreboard,
    name: String,
    search_ms: f64,
    memory_mb: u64,
    destroy_clean: bool,
    contract_violations: u32,
) {
    if !destroy_clean {
        println!("Failed to destroy search context.");
    }
    if contract_violations > 0 {
        println!("{name}: {contract_violations} query result(s) broke the search contract.");
    }
    println!("Memory used: {memory_mb}MB.");
    scoreboard.push(ChallengerResult { name, search_ms });
}

fn record_crashed(scoreboard: &mut Scoreboard, name: String, phase: Phase, message: &str) {
    println!("{name}: CRASHED during {}! ({message})", phase.label());
    scoreboard.push(ChallengerResult {
        name,
        search_ms: CRASHED_TIME,
    });
}

fn print_welcome() {
    println!("--- rankbench: rectangle rank-search challenge ---");
}

fn print_options(spec: &WorkloadSpec, seed: Seed) {
    println!("Point count  : {}", spec.point_count);
    println!("Query count  : {}", spec.query_count);
    println!("Result count : {}", spec.result_count);
    println!("Random seed  : {seed}");
    println!();
}

fn print_phase(phase: Phase, elapsed_ms: f64, query_count: u32) {
    match phase {
        Phase::Load => println!("Loading module... done ({elapsed_ms:.4}ms)."),
        Phase::Generate => {
            println!("Preparing random points and queries... done ({elapsed_ms:.4}ms).")
        }
        Phase::Ruggedness => println!("Ruggedness check... done."),
        Phase::LoadPoints => println!("Loading points... done ({elapsed_ms:.4}ms)."),
        Phase::Query => {
            let avg = if query_count > 0 {
                elapsed_ms / query_count as f64
            } else {
                0.0
            };
            println!("Making queries... done ({elapsed_ms:.4}ms, avg {avg:.4}ms/query).");
        }
        Phase::Release => println!("Release points... done ({elapsed_ms:.4}ms)."),
    }
}

fn print_scoreboard(scoreboard: Scoreboard) {
    println!("\nScoreboard:");
    for (rank, result) in scoreboard.into_ranked().into_iter().enumerate() {
        if result.crashed() {
            println!("#{rank}: CRASHED {}", result.name);
        } else {
            println!("#{rank}: {:.4}ms {}", result.search_ms, result.name);
        }
    }
}
