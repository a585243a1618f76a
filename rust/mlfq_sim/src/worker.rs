//! Worker decision logic.
//!
//! A worker decides what each dispatched burst does: run to termination,
//! burn the whole quantum, or block on simulated I/O. The same workloads
//! drive both the in-process backend and forked worker processes.

use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

use crate::transport::Reply;

/// Chance, in percent, that a burst terminates the process.
pub const TERMINATE_PERCENT: u32 = 10;

/// Chance, in percent, that a burst blocks on I/O.
pub const BLOCK_PERCENT: u32 = 15;

/// Upper bound of the simulated I/O delay, in backend wake units.
pub const MAX_WAKE_AFTER: u32 = 5;

/// Seed of the `index`-th spawned worker in a run seeded with `seed`.
pub fn worker_seed(seed: u64, index: u32) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    /// Finish after using `percent` of the quantum.
    Terminate { percent: u32 },
    /// Use the whole quantum.
    Expire,
    /// Use `percent` of the quantum, then wait `wake_after` units for I/O.
    Block { percent: u32, wake_after: u32 },
}

impl Burst {
    /// The reply that reports this burst to the coordinator.
    pub fn reply(&self) -> Reply {
        match *self {
            Burst::Terminate { percent } => Reply::terminated(percent),
            Burst::Expire => Reply::expired(),
            Burst::Block { percent, .. } => Reply::blocked(percent),
        }
    }
}

pub trait Workload: Send {
    /// Decide what the next dispatched burst does.
    fn next_burst(&mut self) -> Burst;
}

/// The default CPU/I-O mix.
#[derive(Debug)]
pub struct RandomWorkload {
    rng: SmallRng,
}

impl RandomWorkload {
    pub fn new(seed: u64) -> Self {
        RandomWorkload {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Workload for RandomWorkload {
    fn next_burst(&mut self) -> Burst {
        let roll = self.rng.gen_range(0..100);
        if roll < TERMINATE_PERCENT {
            Burst::Terminate {
                percent: self.rng.gen_range(1..=99),
            }
        } else if roll < TERMINATE_PERCENT + BLOCK_PERCENT {
            Burst::Block {
                percent: self.rng.gen_range(1..=99),
                wake_after: self.rng.gen_range(1..=MAX_WAKE_AFTER),
            }
        } else {
            Burst::Expire
        }
    }
}

/// A fixed sequence of bursts, followed by a full-quantum termination.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorkload {
    bursts: VecDeque<Burst>,
}

impl ScriptedWorkload {
    pub fn new(bursts: impl IntoIterator<Item = Burst>) -> Self {
        ScriptedWorkload {
            bursts: bursts.into_iter().collect(),
        }
    }
}

impl Workload for ScriptedWorkload {
    fn next_burst(&mut self) -> Burst {
        self.bursts
            .pop_front()
            .unwrap_or(Burst::Terminate { percent: 100 })
    }
}
