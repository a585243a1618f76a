//! Tick-driven MLFQ scheduling engine.
//!
//! The engine owns the simulated clock, the process table and the run
//! queues, and drives workers through a [`Backend`]. Every tick runs five
//! phases in a fixed order:
//!
//! 1. try to spawn a new process,
//! 2. handle the reply of the running process,
//! 3. swap the active and expired sets when the active set has drained,
//! 4. poll blocked processes for I/O completion,
//! 5. dispatch the highest-priority ready process if nothing runs.
//!
//! Exited workers are reaped at the end of the tick. All mutable run state
//! lives in a [`SchedulerState`] owned by the run loop and lent to each
//! phase.

use std::io::Write;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::ensure;
use anyhow::Context;
use anyhow::Result;
use log::debug;
use log::info;
use log::trace;
use log::warn;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;

use crate::cancel::CancelToken;
use crate::clock::{SimTime, NSEC_PER_SEC};
use crate::config::SchedConfig;
use crate::pcb::{ProcState, ProcessTable};
use crate::queue::RunQueues;
use crate::stats::{Report, Stats};
use crate::trace::{Trace, TraceKind};
use crate::transport::{Backend, ReplyKind, Wait};
use crate::types::{LocalPid, Priority, PRIO_NORMAL, PRIO_REALTIME};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Every process was spawned and has exited.
    Completed,
    /// Spawning was stopped early and in-flight processes drained.
    Drained,
    /// All workers were terminated without draining.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub exit: ExitKind,
    pub report: Report,
    pub trace: Trace,
}

/// Mutable state of one simulation run.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub clock: SimTime,
    pub table: ProcessTable,
    pub queues: RunQueues,
    /// The single dispatched process, if any.
    pub running: Option<LocalPid>,
    /// Earliest clock value for the next spawn attempt.
    pub next_spawn: SimTime,
    pub stats: Stats,
    pub trace: Trace,
}

impl SchedulerState {
    pub fn new(config: &SchedConfig) -> Self {
        SchedulerState {
            clock: SimTime::ZERO,
            table: ProcessTable::new(config.max_concurrent),
            queues: RunQueues::new(config.max_concurrent),
            running: None,
            next_spawn: SimTime::ZERO,
            stats: Stats::default(),
            trace: Trace::new(),
        }
    }

    /// Processes spawned but not yet reaped.
    pub fn in_flight(&self) -> u32 {
        self.stats.spawned - self.stats.exited
    }

    /// Check the structural invariants that must hold between ticks.
    pub fn check_invariants(&self) -> Result<()> {
        ensure!(
            self.clock.nsecs < NSEC_PER_SEC,
            "clock not normalized: {:?}",
            self.clock
        );

        let runners = self
            .table
            .iter()
            .filter(|pcb| pcb.state == ProcState::Running)
            .count();
        ensure!(runners <= 1, "{} processes are running", runners);
        match self.running {
            Some(pid) => ensure!(
                self.table
                    .get(pid)
                    .is_some_and(|pcb| pcb.state == ProcState::Running),
                "running process {} is not in the running state",
                pid
            ),
            None => ensure!(runners == 0, "a process is running with no runner set"),
        }

        let mut queued = 0;
        let mut terminated = 0;
        for pcb in self.table.iter() {
            let pid = pcb.local;
            let places = self.queues.occurrences(pid);
            let running = self.running == Some(pid);
            ensure!(
                places + usize::from(running) <= 1,
                "process {} is in {} queues (running: {})",
                pid,
                places,
                running
            );
            match pcb.state {
                ProcState::Ready => ensure!(
                    self.queues.active().contains(pid) || self.queues.expired().contains(pid),
                    "ready process {} is not on a run queue",
                    pid
                ),
                ProcState::Blocked => ensure!(
                    self.queues.blocked().contains(pid),
                    "blocked process {} is not on the blocked queue",
                    pid
                ),
                ProcState::Running => {}
                ProcState::Terminated => {
                    ensure!(places == 0, "terminated process {} is queued", pid);
                    terminated += 1;
                }
                ProcState::Free => bail!("occupied slot {} is free", pid),
            }
            queued += places;
        }
        ensure!(
            queued == self.queues.len(),
            "queues hold {} ids, table accounts for {}",
            self.queues.len(),
            queued
        );

        let accounted =
            self.stats.exited as usize + queued + usize::from(self.running.is_some()) + terminated;
        ensure!(
            self.stats.spawned as usize == accounted,
            "spawned {} but accounted for {}",
            self.stats.spawned,
            accounted
        );
        Ok(())
    }
}

pub struct Simulator<B: Backend> {
    config: SchedConfig,
    backend: B,
    cancel: CancelToken,
    rng: SmallRng,
    event_log: Option<Box<dyn Write>>,
}

impl<B: Backend> Simulator<B> {
    pub fn new(config: SchedConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Simulator {
            rng: SmallRng::seed_from_u64(config.seed),
            config,
            backend,
            cancel: CancelToken::new(),
            event_log: None,
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Append one line per scheduling event to `log`.
    pub fn with_event_log(mut self, log: Box<dyn Write>) -> Self {
        self.event_log = Some(log);
        self
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn new_state(&self) -> SchedulerState {
        SchedulerState::new(&self.config)
    }

    /// Run the simulation to completion, drain or abort.
    ///
    /// On a fatal error every worker is terminated before the error is
    /// returned.
    pub fn run(&mut self) -> Result<SimulationResult> {
        info!(
            "simulating {} processes, {} slots, quantum {}ns, seed {}",
            self.config.total_procs,
            self.config.max_concurrent,
            self.config.quantum_ns,
            self.config.seed
        );

        let mut state = self.new_state();
        let exit = match self.run_loop(&mut state) {
            Ok(exit) => exit,
            Err(e) => {
                self.backend.terminate_all();
                return Err(e);
            }
        };

        info!(
            "simulation {:?} at {}: {} spawned, {} exited",
            exit, state.clock, state.stats.spawned, state.stats.exited
        );
        Ok(self.finish(state, exit))
    }

    fn run_loop(&mut self, state: &mut SchedulerState) -> Result<ExitKind> {
        loop {
            if self.cancel.is_aborted() {
                warn!(
                    "aborting with {} processes in flight, terminating workers",
                    state.in_flight()
                );
                self.backend.terminate_all();
                return Ok(ExitKind::Aborted);
            }
            if self.is_finished(state) {
                return Ok(if state.stats.spawned < self.config.total_procs {
                    ExitKind::Drained
                } else {
                    ExitKind::Completed
                });
            }
            self.tick(state)?;
        }
    }

    /// Whether the run is over: everything spawned has exited and nothing
    /// more will be spawned.
    pub fn is_finished(&self, state: &SchedulerState) -> bool {
        state.stats.spawned == state.stats.exited
            && (state.stats.spawned >= self.config.total_procs || self.cancel.is_draining())
    }

    /// Advance the clock and run one full tick.
    pub fn tick(&mut self, state: &mut SchedulerState) -> Result<()> {
        state.clock.advance(self.config.tick_ns);
        if state.running.is_none() {
            state.stats.add_idle(self.config.tick_ns);
        }

        self.try_spawn(state)?;
        self.handle_running(state)?;
        self.try_swap(state);
        self.handle_blocked(state)?;
        self.try_schedule(state)?;
        self.reap_exited(state)?;
        Ok(())
    }

    /// Build the final result and flush the event log.
    pub fn finish(&mut self, state: SchedulerState, exit: ExitKind) -> SimulationResult {
        if let Some(log) = self.event_log.as_mut() {
            if let Err(e) = log.flush() {
                warn!("failed to flush event log: {}", e);
            }
        }
        SimulationResult {
            exit,
            report: state.stats.report(state.clock),
            trace: state.trace,
        }
    }

    /// Phase 1: spawn a new process if the spawn budget, the spawn timer and
    /// the process table allow it.
    pub fn try_spawn(&mut self, state: &mut SchedulerState) -> Result<Option<LocalPid>> {
        if self.cancel.is_draining()
            || state.stats.spawned >= self.config.total_procs
            || state.clock < state.next_spawn
        {
            return Ok(None);
        }
        let Some(local) = state.table.lowest_free() else {
            trace!("process table full, skipping spawn");
            return Ok(None);
        };

        let real = self
            .backend
            .spawn(local)
            .with_context(|| format!("failed to spawn worker for process {}", local))?;
        let prio = if self.rng.gen_range(0..100) < self.config.realtime_percent {
            PRIO_REALTIME
        } else {
            PRIO_NORMAL
        };
        if !state.table.claim_slot(local, real, prio, state.clock) {
            bail!("process slot {} is not free", local);
        }
        self.enqueue_active(state, local, prio);

        state.stats.spawned += 1;
        if prio == PRIO_REALTIME {
            state.stats.realtime_spawned += 1;
        } else {
            state.stats.normal_spawned += 1;
        }

        let max_delay = self.config.max_spawn_interval.as_nanos().min(u64::MAX as u128) as u64;
        let delay = self.rng.gen_range(0..=max_delay);
        state.next_spawn = state.clock + SimTime::from_nanos(delay);

        debug!("spawned process {} as worker {} at prio {}", local, real, prio);
        self.record(state, TraceKind::Created { pid: local, prio });
        Ok(Some(local))
    }

    /// Phase 2: wait for the running process to report and act on it.
    pub fn handle_running(&mut self, state: &mut SchedulerState) -> Result<Option<ReplyKind>> {
        let Some(local) = state.running else {
            return Ok(None);
        };
        let (real, prio) = state
            .table
            .get(local)
            .map(|pcb| (pcb.real, pcb.priority))
            .ok_or_else(|| anyhow!("running process {} has no table entry", local))?;

        let reply = self
            .backend
            .receive(real, Wait::Block)
            .with_context(|| format!("failed to receive from process {}", local))?
            .ok_or_else(|| anyhow!("process {} returned without a reply", local))?;
        trace!("process {} replied {}", local, reply);
        state.running = None;

        match reply.kind {
            ReplyKind::Terminated => {
                let percent = reply
                    .percent
                    .ok_or_else(|| anyhow!("process {} terminated without a utilization", local))?;
                self.charge(state, local, prio, percent)?;
                let clock = state.clock;
                let pcb = state
                    .table
                    .get_mut(local)
                    .ok_or_else(|| anyhow!("process {} vanished", local))?;
                pcb.exit = clock;
                pcb.state = ProcState::Terminated;
                pcb.settle_wait();
                let kind = TraceKind::Terminated {
                    pid: local,
                    prio,
                    cpu: pcb.cpu,
                    wait: pcb.wait,
                    block: pcb.block,
                };
                self.record(state, kind);
            }
            ReplyKind::Expired => {
                self.charge(state, local, prio, 100)?;
                let to = self.expire(state, local, prio);
                self.record(
                    state,
                    TraceKind::Expired {
                        pid: local,
                        from: prio,
                        to,
                    },
                );
            }
            ReplyKind::Blocked => {
                let percent = reply
                    .percent
                    .ok_or_else(|| anyhow!("process {} blocked without a utilization", local))?;
                self.charge(state, local, prio, percent)?;
                let clock = state.clock;
                if let Some(pcb) = state.table.get_mut(local) {
                    pcb.state = ProcState::Blocked;
                    pcb.blocked_since = Some(clock);
                }
                if !state.queues.blocked_mut().push(local) {
                    warn!("blocked queue full, dropped process {}", local);
                }
                self.record(state, TraceKind::Blocked { pid: local, prio });
            }
            ReplyKind::Unblocked => {
                bail!("running process {} sent {}", local, reply);
            }
        }
        Ok(Some(reply.kind))
    }

    /// Phase 3: exchange the active and expired sets once nothing is running
    /// and the active set has drained.
    pub fn try_swap(&mut self, state: &mut SchedulerState) -> bool {
        if state.running.is_some()
            || !state.queues.active().is_empty()
            || state.queues.expired().is_empty()
        {
            return false;
        }
        state.queues.swap();
        state.stats.swaps += 1;
        debug!("swapped queue sets, {} ready", state.queues.active().len());
        self.record(state, TraceKind::Swapped);
        true
    }

    /// Phase 4: poll every blocked process once, moving those whose I/O has
    /// completed back to the active set.
    pub fn handle_blocked(&mut self, state: &mut SchedulerState) -> Result<usize> {
        let pending = state.queues.blocked().len();
        if pending == 0 {
            return Ok(0);
        }
        if state.running.is_none() {
            state.clock.advance(self.config.idle_spin_ns);
            state.stats.add_idle(self.config.idle_spin_ns);
        }

        let mut woken = 0;
        for _ in 0..pending {
            let Some(local) = state.queues.blocked_mut().pop() else {
                break;
            };
            let real = state
                .table
                .get(local)
                .map(|pcb| pcb.real)
                .ok_or_else(|| anyhow!("blocked process {} has no table entry", local))?;

            match self
                .backend
                .receive(real, Wait::NoWait)
                .with_context(|| format!("failed to poll blocked process {}", local))?
            {
                Some(reply) if reply.kind == ReplyKind::Unblocked => {
                    let clock = state.clock;
                    let pcb = state
                        .table
                        .get_mut(local)
                        .ok_or_else(|| anyhow!("process {} vanished", local))?;
                    if let Some(since) = pcb.blocked_since.take() {
                        pcb.block += SimTime::difference(clock, since);
                    }
                    pcb.state = ProcState::Ready;
                    let prio = pcb.priority;
                    self.enqueue_active(state, local, prio);
                    self.record(state, TraceKind::Unblocked { pid: local, prio });
                    woken += 1;
                }
                Some(reply) => bail!("blocked process {} sent {}", local, reply),
                None => {
                    state.queues.blocked_mut().push(local);
                }
            }
        }
        Ok(woken)
    }

    /// Phase 5: dispatch the front of the highest non-empty active level.
    pub fn try_schedule(&mut self, state: &mut SchedulerState) -> Result<Option<LocalPid>> {
        if state.running.is_some() {
            return Ok(None);
        }
        let Some((prio, local)) = state.queues.active_mut().pop_highest() else {
            return Ok(None);
        };
        let pcb = state
            .table
            .get_mut(local)
            .ok_or_else(|| anyhow!("queued process {} has no table entry", local))?;
        pcb.state = ProcState::Running;
        let real = pcb.real;
        state.running = Some(local);
        state.stats.dispatches += 1;

        self.backend
            .dispatch(real, Wait::NoWait)
            .with_context(|| format!("failed to dispatch process {}", local))?;
        self.record(state, TraceKind::Dispatched { pid: local, prio });
        if self.config.digest {
            self.digest(state);
        }
        Ok(Some(local))
    }

    /// Collect every exited worker, fold its totals into the statistics and
    /// release its slot.
    pub fn reap_exited(&mut self, state: &mut SchedulerState) -> Result<u32> {
        let mut reaped = 0;
        while let Some(exit) = self.backend.reap()? {
            let Some(mut pcb) = state.table.release(exit.local) else {
                warn!("reaped unknown process {} (status {})", exit.local, exit.status);
                continue;
            };
            if pcb.state != ProcState::Terminated {
                warn!(
                    "process {} exited with status {} while {:?}",
                    exit.local, exit.status, pcb.state
                );
                state.queues.remove(exit.local);
                if state.running == Some(exit.local) {
                    state.running = None;
                }
                if let Some(since) = pcb.blocked_since.take() {
                    pcb.block += SimTime::difference(state.clock, since);
                }
                pcb.exit = state.clock;
                pcb.settle_wait();
            }
            state.stats.fold(&pcb);
            self.record(
                state,
                TraceKind::Exited {
                    pid: exit.local,
                    status: exit.status,
                },
            );
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Charge `percent` of the quantum at `prio` to the process and the clock.
    fn charge(
        &self,
        state: &mut SchedulerState,
        local: LocalPid,
        prio: Priority,
        percent: u32,
    ) -> Result<()> {
        let cost = self.config.burst_cost(prio, percent);
        let pcb = state
            .table
            .get_mut(local)
            .ok_or_else(|| anyhow!("process {} has no table entry", local))?;
        pcb.cpu.advance(cost);
        pcb.queue.advance(cost);
        state.clock.advance(cost);
        Ok(())
    }

    /// Requeue a process that used its whole quantum and return its new
    /// priority. Real-time processes go back on the active set unchanged;
    /// normal ones land on the expired set, one level lower once they have
    /// used up the aging threshold of their level.
    fn expire(&mut self, state: &mut SchedulerState, local: LocalPid, prio: Priority) -> Priority {
        let Some(pcb) = state.table.get_mut(local) else {
            return prio;
        };
        pcb.state = ProcState::Ready;

        if pcb.is_realtime() {
            self.enqueue_active(state, local, prio);
            return prio;
        }

        let mut to = prio;
        if let Some(threshold) = self.config.aging_threshold(prio) {
            if pcb.queue >= threshold {
                to = prio + 1;
                pcb.priority = to;
                pcb.queue = SimTime::ZERO;
                state.stats.demotions += 1;
                debug!("process {} aged from prio {} to {}", local, prio, to);
            }
        }
        if !state.queues.expired_mut().level_mut(to).push(local) {
            warn!("expired queue {} full, dropped process {}", to, local);
        }
        to
    }

    fn enqueue_active(&self, state: &mut SchedulerState, local: LocalPid, prio: Priority) {
        if !state.queues.active_mut().level_mut(prio).push(local) {
            warn!("active queue {} full, dropped process {}", prio, local);
        }
    }

    fn record(&mut self, state: &mut SchedulerState, kind: TraceKind) {
        let event = state.trace.record(state.clock, kind);
        debug!("{}", event);
        if let Some(log) = self.event_log.as_mut() {
            if let Err(e) = writeln!(log, "{}", event) {
                warn!("event log write failed, disabling it: {}", e);
                self.event_log = None;
            }
        }
    }

    fn digest(&mut self, state: &SchedulerState) {
        let line = format!(
            "[{:>20}] DIGEST    active={} expired={} blocked={}",
            state.clock.to_string(),
            fmt_levels(&state.queues.active().snapshot()),
            fmt_levels(&state.queues.expired().snapshot()),
            fmt_pids(state.queues.blocked().iter()),
        );
        debug!("{}", line);
        if let Some(log) = self.event_log.as_mut() {
            if let Err(e) = writeln!(log, "{}", line) {
                warn!("event log write failed, disabling it: {}", e);
                self.event_log = None;
            }
        }
    }
}

fn fmt_pids(pids: impl Iterator<Item = LocalPid>) -> String {
    let pids: Vec<String> = pids.map(|p| p.to_string()).collect();
    format!("[{}]", pids.join(" "))
}

fn fmt_levels(levels: &[Vec<LocalPid>]) -> String {
    let levels: Vec<String> = levels
        .iter()
        .map(|level| fmt_pids(level.iter().copied()))
        .collect();
    levels.join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inproc::InProcessBackend;
    use crate::transport::Transport;
    use crate::worker::{Burst, ScriptedWorkload};

    fn config(total: u32, slots: usize) -> SchedConfig {
        SchedConfig {
            total_procs: total,
            max_concurrent: slots,
            realtime_percent: 0,
            max_spawn_interval: SimTime::ZERO,
            ..SchedConfig::default()
        }
    }

    fn scripted(bursts: Vec<Burst>) -> InProcessBackend {
        InProcessBackend::new(move |_, _| Box::new(ScriptedWorkload::new(bursts.clone())))
    }

    #[test]
    fn levels_format() {
        let levels = vec![vec![LocalPid(1), LocalPid(2)], vec![], vec![LocalPid(3)]];
        assert_eq!(fmt_levels(&levels), "[1 2][][3]");
    }

    #[test]
    fn expire_demotes_past_threshold() {
        let mut sim = Simulator::new(config(1, 1), scripted(vec![])).unwrap();
        let mut state = sim.new_state();
        let pid = sim.try_spawn(&mut state).unwrap().unwrap();
        state.queues.active_mut().remove(pid);
        state.table.get_mut(pid).unwrap().queue = SimTime::from_nanos(20_000);

        assert_eq!(sim.expire(&mut state, pid, PRIO_NORMAL), 2);
        assert!(state.queues.expired().level(2).contains(pid));
        assert_eq!(state.table.get(pid).unwrap().queue, SimTime::ZERO);
        assert_eq!(state.stats.demotions, 1);
    }

    #[test]
    fn expire_keeps_level_below_threshold() {
        let mut sim = Simulator::new(config(1, 1), scripted(vec![])).unwrap();
        let mut state = sim.new_state();
        let pid = sim.try_spawn(&mut state).unwrap().unwrap();
        state.queues.active_mut().remove(pid);
        state.table.get_mut(pid).unwrap().queue = SimTime::from_nanos(19_999);

        assert_eq!(sim.expire(&mut state, pid, PRIO_NORMAL), PRIO_NORMAL);
        assert!(state.queues.expired().level(1).contains(pid));
        assert_eq!(state.stats.demotions, 0);
    }

    #[test]
    fn unblocked_from_runner_is_fatal() {
        let backend = scripted(vec![Burst::Block {
            percent: 10,
            wake_after: 1,
        }]);
        let mut sim = Simulator::new(config(1, 1), backend).unwrap();
        let mut state = sim.new_state();
        let pid = sim.try_spawn(&mut state).unwrap().unwrap();
        let real = state.table.get(pid).unwrap().real;
        sim.try_schedule(&mut state).unwrap();
        // Swallow the BLOCKED reply so the runner's next message is UNBLOCKED.
        sim.backend_mut().receive(real, Wait::Block).unwrap();
        let err = sim.handle_running(&mut state).unwrap_err();
        assert!(err.to_string().contains("UNBLOCKED"), "{err}");
    }

    #[test]
    fn missing_reply_is_fatal() {
        let mut sim = Simulator::new(config(1, 1), scripted(vec![Burst::Expire])).unwrap();
        let mut state = sim.new_state();
        let pid = sim.try_spawn(&mut state).unwrap().unwrap();
        let real = state.table.get(pid).unwrap().real;
        sim.try_schedule(&mut state).unwrap();
        sim.backend_mut().receive(real, Wait::Block).unwrap();
        assert!(sim.handle_running(&mut state).is_err());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let config = SchedConfig {
            tick_ns: 0,
            idle_spin_ns: 0,
            max_spawn_interval: SimTime::new(1, 0),
            ..config(2, 2)
        };
        assert!(Simulator::new(config, scripted(vec![])).is_err());
    }

    #[test]
    fn runner_crash_before_reply_is_reaped() {
        let mut sim = Simulator::new(config(2, 2), scripted(vec![Burst::Expire])).unwrap();
        let mut state = sim.new_state();
        let p1 = sim.try_spawn(&mut state).unwrap().unwrap();
        let p2 = sim.try_spawn(&mut state).unwrap().unwrap();
        assert_eq!(sim.try_schedule(&mut state).unwrap(), Some(p1));

        // Dies after dispatch; reaping runs before the next receive.
        let real = state.table.get(p1).unwrap().real;
        assert!(sim.backend_mut().crash(real));
        assert_eq!(sim.reap_exited(&mut state).unwrap(), 1);
        assert_eq!(state.running, None);
        assert!(state.table.get(p1).is_none());
        assert_eq!(state.stats.exited, 1);
        state.check_invariants().unwrap();

        sim.tick(&mut state).unwrap();
        assert_eq!(state.running, Some(p2));
        state.check_invariants().unwrap();
    }

    #[test]
    fn invariants_hold_on_fresh_state() {
        let sim = Simulator::new(config(3, 3), scripted(vec![])).unwrap();
        sim.new_state().check_invariants().unwrap();
    }
}
