//! Simulation configuration.
//!
//! Every tunable lives in [`SchedConfig`]. Defaults reproduce the classic
//! 18-slot simulator: a 10us base quantum, 4 priority levels, 40 processes.
//! A config can be read from JSON; absent fields keep their defaults.

use std::fs;
use std::path::Path;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;

use crate::clock::{SimTime, NSEC_PER_SEC};
use crate::types::{Priority, PRIO_LOWEST, PRIO_REALTIME};

/// The base quantum must be strictly greater than this.
pub const QUANTUM_MIN_NS: u64 = 1_000;

/// Largest accepted base quantum: one simulated second.
pub const QUANTUM_MAX_NS: u64 = NSEC_PER_SEC;

/// Upper bound on the process table size.
pub const MAX_CONCURRENT_LIMIT: usize = 64;

/// Upper bound on the number of processes spawned over one run.
pub const TOTAL_PROCS_LIMIT: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    /// Base time quantum in simulated nanoseconds.
    pub quantum_ns: u64,
    /// Processes spawned over the whole run.
    pub total_procs: u32,
    /// Process table capacity, and capacity of every queue.
    pub max_concurrent: usize,
    /// Percent chance that a new process is real-time.
    pub realtime_percent: u32,
    /// Upper bound of the random delay between spawn attempts.
    pub max_spawn_interval: SimTime,
    /// Clock advance at the top of each tick.
    pub tick_ns: u64,
    /// Idle time charged per tick while only blocked work exists.
    pub idle_spin_ns: u64,
    /// Seed for the coordinator PRNG.
    pub seed: u64,
    /// Emit a queue digest after every dispatch.
    pub digest: bool,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            quantum_ns: 10_000,
            total_procs: 40,
            max_concurrent: 18,
            realtime_percent: 5,
            max_spawn_interval: SimTime::new(1, 150_000),
            tick_ns: 10_000,
            idle_spin_ns: 5_000_000,
            seed: 0,
            digest: false,
        }
    }
}

impl SchedConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            bail!("config is empty");
        }
        let config: SchedConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json_str(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantum_ns <= QUANTUM_MIN_NS || self.quantum_ns > QUANTUM_MAX_NS {
            bail!(
                "quantum must be in {}..={}ns, got {}ns",
                QUANTUM_MIN_NS + 1,
                QUANTUM_MAX_NS,
                self.quantum_ns
            );
        }
        // The clock only moves on its own through the tick.
        if self.tick_ns == 0 {
            bail!("tick_ns must be non-zero");
        }
        if self.total_procs == 0 || self.total_procs > TOTAL_PROCS_LIMIT {
            bail!(
                "total_procs must be in 1..={}, got {}",
                TOTAL_PROCS_LIMIT,
                self.total_procs
            );
        }
        if self.max_concurrent == 0 || self.max_concurrent > MAX_CONCURRENT_LIMIT {
            bail!(
                "max_concurrent must be in 1..={}, got {}",
                MAX_CONCURRENT_LIMIT,
                self.max_concurrent
            );
        }
        if self.realtime_percent > 100 {
            bail!("realtime_percent must be <= 100, got {}", self.realtime_percent);
        }
        Ok(())
    }

    /// Full-quantum cost at `prio`: the base quantum halved per level.
    pub fn base_cost(&self, prio: Priority) -> u64 {
        self.quantum_ns >> prio
    }

    /// Cost of a burst that used `percent` of its quantum at `prio`.
    pub fn burst_cost(&self, prio: Priority, percent: u32) -> u64 {
        self.base_cost(prio) * percent.min(100) as u64 / 100
    }

    /// CPU a normal process may accumulate at `prio` before it is demoted.
    /// The quantum doubles per level; real-time and the lowest level never age.
    pub fn aging_threshold(&self, prio: Priority) -> Option<SimTime> {
        if prio == PRIO_REALTIME || prio >= PRIO_LOWEST {
            return None;
        }
        Some(SimTime::from_nanos(self.quantum_ns << prio))
    }
}
