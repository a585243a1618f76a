#![allow(dead_code)]

use anyhow::Result;
use simplelog::{Config, LevelFilter, TestLogger};

use mlfq_sim::*;

/// Initialize logging for a test. Safe to call from every test; only the
/// first call installs the logger.
pub fn setup_test() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

/// Normal-priority processes spawned one per tick.
pub fn config(total_procs: u32, max_concurrent: usize) -> SchedConfig {
    SchedConfig {
        total_procs,
        max_concurrent,
        realtime_percent: 0,
        max_spawn_interval: SimTime::ZERO,
        ..SchedConfig::default()
    }
}

/// Process `n` (in spawn order) runs `scripts[n]`; processes past the end of
/// `scripts` terminate on their first dispatch.
pub fn scripted(scripts: Vec<Vec<Burst>>) -> InProcessBackend {
    InProcessBackend::new(move |_, index| {
        let bursts = scripts.get(index as usize).cloned().unwrap_or_default();
        Box::new(ScriptedWorkload::new(bursts))
    })
}

/// The same script for every process.
pub fn uniform(bursts: Vec<Burst>) -> InProcessBackend {
    InProcessBackend::new(move |_, _| Box::new(ScriptedWorkload::new(bursts.clone())))
}

pub fn expires(n: usize) -> Vec<Burst> {
    vec![Burst::Expire; n]
}

/// Run tick by tick until the simulation is finished, checking invariants
/// and clock monotonicity after every tick. Gives up after `max_ticks`.
pub fn run_checked<B: Backend>(
    sim: &mut Simulator<B>,
    max_ticks: u64,
) -> Result<SchedulerState> {
    let mut state = sim.new_state();
    let mut ticks = 0;
    while !sim.is_finished(&state) {
        let before = state.clock;
        sim.tick(&mut state)?;
        state.check_invariants()?;
        anyhow::ensure!(state.clock > before, "clock did not advance");
        ticks += 1;
        anyhow::ensure!(ticks < max_ticks, "no progress after {} ticks", ticks);
    }
    Ok(state)
}
