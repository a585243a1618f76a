// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.
mod process;
mod worker;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use log::info;
use log::warn;

use mlfq_sim::config::{QUANTUM_MAX_NS, QUANTUM_MIN_NS};
use mlfq_sim::{
    Backend, CancelToken, ExitKind, InProcessBackend, SchedConfig, SimulationResult, Simulator,
};

use process::ProcessBackend;

/// mlfq_oss: simulated operating system process scheduler.
///
/// The coordinator keeps a simulated clock and a bounded process table and
/// schedules simulated processes with a four-level multilevel feedback queue.
/// Every process is backed by a forked worker that decides, one dispatch at a
/// time, whether it runs out its quantum, blocks on I/O or terminates.
///
/// After the timeout no new processes are spawned and the ones in flight are
/// drained. Ctrl-C terminates all workers immediately.
#[derive(Debug, Parser)]
#[clap(version)]
struct Opts {
    /// Base time quantum in simulated nanoseconds. Halved per priority level.
    #[clap(short = 'q', long, value_parser = clap::value_parser!(u64).range(QUANTUM_MIN_NS + 1..=QUANTUM_MAX_NS))]
    quantum: Option<u64>,

    /// Wall-clock seconds before spawning stops and the simulation drains.
    #[clap(short = 't', long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Write a queue digest to the event log after every dispatch.
    #[clap(short = 'd', long, action = clap::ArgAction::SetTrue)]
    digest: bool,

    /// Total number of processes to spawn.
    #[clap(short = 'n', long)]
    total_procs: Option<u32>,

    /// Process table size.
    #[clap(short = 's', long)]
    max_concurrent: Option<usize>,

    /// Seed for the coordinator and worker random number generators.
    #[clap(long)]
    seed: Option<u64>,

    /// JSON file with scheduler settings. Command-line flags take precedence.
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,

    /// Event log, truncated at start.
    #[clap(short = 'l', long, default_value = "output.log")]
    log: PathBuf,

    /// Run workers inside the coordinator instead of forking them.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    inproc: bool,

    /// Print the final report as JSON.
    #[clap(long, action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Option<Cmd>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Serve dispatches from the coordinator on stdin/stdout.
    #[clap(hide = true)]
    Worker {
        #[clap(long)]
        local: u32,
        #[clap(long)]
        seed: u64,
    },
}

fn load_config(opts: &Opts) -> Result<SchedConfig> {
    let mut config = match &opts.config {
        Some(path) => SchedConfig::from_json_file(path)?,
        None => SchedConfig::default(),
    };
    if let Some(quantum) = opts.quantum {
        config.quantum_ns = quantum;
    }
    if let Some(total) = opts.total_procs {
        config.total_procs = total;
    }
    if let Some(slots) = opts.max_concurrent {
        config.max_concurrent = slots;
    }
    if let Some(seed) = opts.seed {
        config.seed = seed;
    }
    config.digest |= opts.digest;
    config.validate()?;
    Ok(config)
}

fn simulate<B: Backend>(
    config: SchedConfig,
    backend: B,
    cancel: CancelToken,
    log: File,
) -> Result<SimulationResult> {
    Simulator::new(config, backend)?
        .with_cancel(cancel)
        .with_event_log(Box::new(BufWriter::new(log)))
        .run()
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    if let Some(Cmd::Worker { local, seed }) = opts.command {
        let status = worker::run(local, seed)?;
        std::process::exit(status);
    }

    let config = load_config(&opts)?;
    let log = File::create(&opts.log)
        .with_context(|| format!("Failed to create event log {}", opts.log.display()))?;

    let cancel = CancelToken::new();
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || cancel.request_abort()
    })
    .context("Error setting Ctrl-C handler")?;

    thread::spawn({
        let cancel = cancel.clone();
        let timeout = Duration::from_secs(opts.timeout);
        move || {
            thread::sleep(timeout);
            info!("timeout after {:?}, draining", timeout);
            cancel.request_drain();
        }
    });

    let seed = config.seed;
    let result = if opts.inproc {
        simulate(config, InProcessBackend::random(seed), cancel, log)?
    } else {
        simulate(config, ProcessBackend::new(seed)?, cancel, log)?
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&result.report)?);
    } else {
        println!("{}", result.report);
    }

    if result.exit == ExitKind::Aborted {
        warn!("simulation aborted");
        std::process::exit(1);
    }
    Ok(())
}
