//! In-process worker backend.
//!
//! Workers are plain state machines driven by a [`Workload`]. A dispatch
//! queues exactly one reply; a blocked worker reports `UNBLOCKED` after it
//! has been polled `wake_after` times. Terminated workers are queued for
//! reaping once their `TERMINATED` reply has been received.

use std::collections::HashMap;
use std::collections::VecDeque;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use log::debug;

use crate::transport::{Exit, Reply, ReplyKind, Spawner, Transport, Wait};
use crate::types::{LocalPid, RealPid, EXIT_STATUS_OFFSET};
use crate::worker::{worker_seed, Burst, RandomWorkload, Workload};

/// Builds the workload of a new worker from its local id and spawn index.
pub type WorkloadFactory = Box<dyn FnMut(LocalPid, u32) -> Box<dyn Workload>>;

/// First real id handed out, to keep real and local ids visibly apart.
const FIRST_REAL_PID: i32 = 1000;

struct InProcWorker {
    local: LocalPid,
    workload: Box<dyn Workload>,
    outbox: VecDeque<Reply>,
    /// Polls left before an `UNBLOCKED` reply, while blocked.
    wake_in: Option<u32>,
}

pub struct InProcessBackend {
    factory: WorkloadFactory,
    workers: HashMap<RealPid, InProcWorker>,
    exits: VecDeque<Exit>,
    next_real: i32,
    spawned: u32,
    spawn_limit: Option<u32>,
    killed: usize,
}

impl InProcessBackend {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut(LocalPid, u32) -> Box<dyn Workload> + 'static,
    {
        InProcessBackend {
            factory: Box::new(factory),
            workers: HashMap::new(),
            exits: VecDeque::new(),
            next_real: FIRST_REAL_PID,
            spawned: 0,
            spawn_limit: None,
            killed: 0,
        }
    }

    /// Every worker runs a [`RandomWorkload`] seeded from `seed` and its
    /// spawn index.
    pub fn random(seed: u64) -> Self {
        Self::new(move |_, index| Box::new(RandomWorkload::new(worker_seed(seed, index))))
    }

    /// Fail every spawn after the first `limit`.
    pub fn with_spawn_limit(mut self, limit: u32) -> Self {
        self.spawn_limit = Some(limit);
        self
    }

    pub fn live(&self) -> usize {
        self.workers.len()
    }

    /// Workers removed by [`Spawner::terminate_all`].
    pub fn killed(&self) -> usize {
        self.killed
    }

    /// Make a worker exit without reporting termination.
    pub fn crash(&mut self, real: RealPid) -> bool {
        match self.workers.remove(&real) {
            Some(worker) => {
                self.exits.push_back(Exit {
                    local: worker.local,
                    status: -1,
                });
                true
            }
            None => false,
        }
    }

    fn worker_mut(&mut self, real: RealPid) -> Result<&mut InProcWorker> {
        self.workers
            .get_mut(&real)
            .ok_or_else(|| anyhow!("no live worker with real id {}", real))
    }
}

impl Spawner for InProcessBackend {
    fn spawn(&mut self, local: LocalPid) -> Result<RealPid> {
        if self.spawn_limit.is_some_and(|limit| self.spawned >= limit) {
            bail!("spawn limit reached, cannot create worker for {}", local);
        }
        let real = RealPid(self.next_real);
        self.next_real += 1;
        let workload = (self.factory)(local, self.spawned);
        self.spawned += 1;
        self.workers.insert(
            real,
            InProcWorker {
                local,
                workload,
                outbox: VecDeque::new(),
                wake_in: None,
            },
        );
        debug!("inproc: spawned worker {} for process {}", real, local);
        Ok(real)
    }

    fn reap(&mut self) -> Result<Option<Exit>> {
        Ok(self.exits.pop_front())
    }

    fn terminate_all(&mut self) {
        self.killed += self.workers.len();
        self.workers.clear();
        self.exits.clear();
    }
}

impl Transport for InProcessBackend {
    fn dispatch(&mut self, to: RealPid, _wait: Wait) -> Result<()> {
        let worker = self.worker_mut(to)?;
        if !worker.outbox.is_empty() || worker.wake_in.is_some() {
            bail!("worker {} dispatched before its last reply was consumed", to);
        }
        let burst = worker.workload.next_burst();
        if let Burst::Block { wake_after, .. } = burst {
            worker.wake_in = Some(wake_after.max(1));
        }
        worker.outbox.push_back(burst.reply());
        Ok(())
    }

    fn receive(&mut self, from: RealPid, wait: Wait) -> Result<Option<Reply>> {
        let worker = self.worker_mut(from)?;
        if let Some(reply) = worker.outbox.pop_front() {
            if reply.kind == ReplyKind::Terminated {
                let local = worker.local;
                self.workers.remove(&from);
                self.exits.push_back(Exit {
                    local,
                    status: EXIT_STATUS_OFFSET + local.0 as i32,
                });
            }
            return Ok(Some(reply));
        }
        if let Some(left) = worker.wake_in.as_mut() {
            *left -= 1;
            if *left == 0 {
                worker.wake_in = None;
                return Ok(Some(Reply::unblocked()));
            }
            return Ok(None);
        }
        match wait {
            Wait::Block => bail!("worker {} has nothing to report", from),
            Wait::NoWait => Ok(None),
        }
    }
}
