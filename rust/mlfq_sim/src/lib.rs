//! mlfq_sim - Multilevel-feedback-queue process scheduler simulation.
//!
//! A coordinator keeps a simulated clock and a bounded process table, and
//! decides which simulated process runs next. Workers stand in for real
//! workloads and only ever talk to the coordinator through a typed
//! request/response transport.
//!
//! # Architecture
//!
//! - **Clock**: seconds + nanoseconds simulated time
//! - **Queues**: bounded FIFOs forming the active, expired and blocked queues
//! - **Process table**: per-process bookkeeping with a bit vector of used slots
//! - **Engine**: the five-phase tick loop and its event handlers
//! - **Transport**: the coordinator/worker boundary and its wire format
//! - **Workers**: workload logic and the in-process backend
//!
//! # Usage
//!
//! ```rust,no_run
//! use mlfq_sim::*;
//!
//! let config = SchedConfig {
//!     total_procs: 10,
//!     ..SchedConfig::default()
//! };
//! let mut sim = Simulator::new(config, InProcessBackend::random(7)).unwrap();
//! let result = sim.run().unwrap();
//! println!("{}", result.report);
//! ```

pub mod cancel;
pub mod clock;
pub mod config;
pub mod engine;
pub mod inproc;
pub mod pcb;
pub mod queue;
pub mod stats;
pub mod trace;
pub mod transport;
pub mod types;
pub mod worker;

pub use cancel::CancelToken;
pub use clock::SimTime;
pub use config::SchedConfig;
pub use engine::{ExitKind, SchedulerState, SimulationResult, Simulator};
pub use inproc::InProcessBackend;
pub use pcb::{Pcb, ProcState, ProcessTable};
pub use queue::{BoundedQueue, QueueSet, RunQueues};
pub use stats::{Report, Stats};
pub use trace::{Trace, TraceEvent, TraceKind};
pub use transport::{Backend, Exit, Reply, ReplyKind, Spawner, Transport, Wait};
pub use types::*;
pub use worker::{worker_seed, Burst, RandomWorkload, ScriptedWorkload, Workload};
