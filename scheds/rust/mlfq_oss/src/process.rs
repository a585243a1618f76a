// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Worker backend running every simulated process as a forked OS process.
//!
//! Each worker is this executable re-run as `mlfq_oss worker`, in its own
//! process group so terminal signals reach only the coordinator. The
//! coordinator writes dispatch lines to the worker's stdin; a reader thread
//! per worker parses reply lines from its stdout into a channel, which gives
//! the engine blocking and non-blocking receive tagged by real pid.

use std::collections::HashMap;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Child;
use std::process::ChildStdin;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;
use std::thread;
use std::thread::JoinHandle;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use crossbeam::channel::unbounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::TryRecvError;
use log::debug;
use log::info;
use log::warn;

use mlfq_sim::transport::DISPATCH_LINE;
use mlfq_sim::{worker_seed, Exit, LocalPid, RealPid, Reply, Spawner, Transport, Wait};

struct WorkerProc {
    local: LocalPid,
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<Reply>,
    reader: Option<JoinHandle<()>>,
    /// Set once the process has exited. The exit is reported only after
    /// every reply it sent has been received.
    status: Option<ExitStatus>,
}

pub struct ProcessBackend {
    exe: PathBuf,
    seed: u64,
    spawned: u32,
    workers: HashMap<RealPid, WorkerProc>,
}

impl ProcessBackend {
    pub fn new(seed: u64) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate own executable")?;
        Ok(ProcessBackend {
            exe,
            seed,
            spawned: 0,
            workers: HashMap::new(),
        })
    }

    fn worker(&mut self, real: RealPid) -> Result<&mut WorkerProc> {
        self.workers
            .get_mut(&real)
            .ok_or_else(|| anyhow!("no live worker with pid {}", real))
    }
}

fn read_replies(real: RealPid, stdout: impl BufRead, tx: crossbeam::channel::Sender<Reply>) {
    for line in stdout.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("worker {}: read failed: {}", real, e);
                break;
            }
        };
        match line.parse::<Reply>() {
            Ok(reply) => {
                if tx.send(reply).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("worker {}: {:#}", real, e);
                break;
            }
        }
    }
}

/// Exit code, or the negated signal number for a worker killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

impl Spawner for ProcessBackend {
    fn spawn(&mut self, local: LocalPid) -> Result<RealPid> {
        let seed = worker_seed(self.seed, self.spawned);
        let mut child = Command::new(&self.exe)
            .arg("worker")
            .arg("--local")
            .arg(local.0.to_string())
            .arg("--seed")
            .arg(seed.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .with_context(|| format!("Failed to exec {}", self.exe.display()))?;
        self.spawned += 1;

        let real = RealPid(child.id() as i32);
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("worker {} has no stdin", real))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("worker {} has no stdout", real))?;

        let (tx, rx) = unbounded();
        let reader = thread::Builder::new()
            .name(format!("worker-{}", local))
            .spawn(move || read_replies(real, BufReader::new(stdout), tx))
            .context("Failed to start reply reader")?;

        debug!("forked worker {} for process {}", real, local);
        self.workers.insert(
            real,
            WorkerProc {
                local,
                child,
                stdin,
                replies: rx,
                reader: Some(reader),
                status: None,
            },
        );
        Ok(real)
    }

    fn reap(&mut self) -> Result<Option<Exit>> {
        let mut exited = None;
        for (real, worker) in self.workers.iter_mut() {
            if worker.status.is_none() {
                worker.status = worker
                    .child
                    .try_wait()
                    .with_context(|| format!("Failed to poll worker {}", real))?;
                if worker.status.is_some() {
                    // Stdout is closed, so the reader has forwarded everything.
                    if let Some(reader) = worker.reader.take() {
                        let _ = reader.join();
                    }
                }
            }
            if worker.status.is_some() && worker.replies.is_empty() {
                exited = Some(*real);
                break;
            }
        }
        let Some(real) = exited else {
            return Ok(None);
        };

        let Some(worker) = self.workers.remove(&real) else {
            bail!("worker {} vanished while reaping", real);
        };
        Ok(Some(Exit {
            local: worker.local,
            status: worker.status.map(exit_code).unwrap_or(-1),
        }))
    }

    fn terminate_all(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        info!("terminating {} workers", self.workers.len());
        for real in self.workers.keys() {
            // Negative pid addresses the worker's whole process group.
            if unsafe { libc::kill(-real.0, libc::SIGTERM) } != 0 {
                debug!("kill({}) failed: {}", real, std::io::Error::last_os_error());
            }
        }
        for (real, mut worker) in self.workers.drain() {
            if worker.status.is_some() {
                continue;
            }
            if let Err(e) = worker.child.wait() {
                warn!("failed to wait for worker {}: {}", real, e);
            }
            if let Some(reader) = worker.reader.take() {
                let _ = reader.join();
            }
        }
    }
}

impl Transport for ProcessBackend {
    fn dispatch(&mut self, to: RealPid, _wait: Wait) -> Result<()> {
        let worker = self.worker(to)?;
        writeln!(worker.stdin, "{}", DISPATCH_LINE)
            .and_then(|_| worker.stdin.flush())
            .with_context(|| format!("Failed to dispatch worker {}", to))
    }

    fn receive(&mut self, from: RealPid, wait: Wait) -> Result<Option<Reply>> {
        let worker = self.worker(from)?;
        match wait {
            Wait::Block => match worker.replies.recv() {
                Ok(reply) => Ok(Some(reply)),
                Err(_) => bail!("worker {} hung up", from),
            },
            // A worker that died while blocked is picked up by reaping.
            Wait::NoWait => match worker.replies.try_recv() {
                Ok(reply) => Ok(Some(reply)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
            },
        }
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
