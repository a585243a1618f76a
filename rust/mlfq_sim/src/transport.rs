//! Coordinator/worker boundary.
//!
//! The engine never touches worker memory. It spawns workers through a
//! [`Spawner`], tells them to run through a [`Transport`], and learns what
//! they did only from the typed [`Reply`] that comes back. Replies are tagged
//! with the worker's real id so blocked workers can be polled individually.
//!
//! Process-backed workers talk a line protocol: the coordinator writes
//! [`DISPATCH_LINE`] and the worker answers with one reply line
//! (`TERMINATED 50`, `EXPIRED`, `BLOCKED 30`, `UNBLOCKED`).

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;

use crate::types::{LocalPid, RealPid};

/// Line sent to a worker to let it run one burst.
pub const DISPATCH_LINE: &str = "RUN";

/// What a worker reports after (or while) running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    Terminated,
    Expired,
    Blocked,
    Unblocked,
}

impl ReplyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplyKind::Terminated => "TERMINATED",
            ReplyKind::Expired => "EXPIRED",
            ReplyKind::Blocked => "BLOCKED",
            ReplyKind::Unblocked => "UNBLOCKED",
        }
    }
}

/// A worker event, with the share of its quantum it used where that applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub percent: Option<u32>,
}

impl Reply {
    pub fn terminated(percent: u32) -> Self {
        Reply {
            kind: ReplyKind::Terminated,
            percent: Some(percent),
        }
    }

    pub fn expired() -> Self {
        Reply {
            kind: ReplyKind::Expired,
            percent: None,
        }
    }

    pub fn blocked(percent: u32) -> Self {
        Reply {
            kind: ReplyKind::Blocked,
            percent: Some(percent),
        }
    }

    pub fn unblocked() -> Self {
        Reply {
            kind: ReplyKind::Unblocked,
            percent: None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percent {
            Some(percent) => write!(f, "{} {}", self.kind.as_str(), percent),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

impl FromStr for Reply {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let tag = fields.next().ok_or_else(|| anyhow!("empty reply"))?;
        let kind = match tag {
            "TERMINATED" => ReplyKind::Terminated,
            "EXPIRED" => ReplyKind::Expired,
            "BLOCKED" => ReplyKind::Blocked,
            "UNBLOCKED" => ReplyKind::Unblocked,
            other => bail!("unknown reply tag {:?}", other),
        };
        let percent = match fields.next() {
            Some(p) => Some(
                p.parse::<u32>()
                    .map_err(|e| anyhow!("bad percentage {:?} in {:?}: {}", p, line, e))?,
            ),
            None => None,
        };
        if fields.next().is_some() {
            bail!("trailing fields in reply {:?}", line);
        }
        if percent.is_some_and(|p| p > 100) {
            bail!("percentage out of range in {:?}", line);
        }
        Ok(Reply { kind, percent })
    }
}

/// Whether a transport call may block the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Block,
    NoWait,
}

/// A reaped worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub local: LocalPid,
    pub status: i32,
}

/// Request/response channel between coordinator and workers.
pub trait Transport {
    /// Tell the worker tagged `to` to run one burst.
    fn dispatch(&mut self, to: RealPid, wait: Wait) -> Result<()>;

    /// Receive the next reply tagged `from`. With [`Wait::NoWait`], `Ok(None)`
    /// means nothing is pending yet; with [`Wait::Block`] it never returns
    /// `Ok(None)`.
    fn receive(&mut self, from: RealPid, wait: Wait) -> Result<Option<Reply>>;
}

/// Worker lifecycle.
pub trait Spawner {
    /// Create a worker standing in for `local`. Failure is fatal to the run.
    fn spawn(&mut self, local: LocalPid) -> Result<RealPid>;

    /// Collect one exited worker, without blocking.
    fn reap(&mut self) -> Result<Option<Exit>>;

    /// Terminate every live worker and release backend resources.
    fn terminate_all(&mut self);
}

/// Everything the engine needs from a worker backend.
pub trait Backend: Spawner + Transport {}

impl<T: Spawner + Transport> Backend for T {}
