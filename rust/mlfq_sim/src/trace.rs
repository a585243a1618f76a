//! Scheduling event trace.
//!
//! Every scheduling action is recorded as a `TraceEvent` stamped with the
//! simulated clock. The same events, formatted with `Display`, are the lines
//! of the append-only event log.

use std::fmt;

use crate::clock::SimTime;
use crate::types::{LocalPid, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub time: SimTime,
    pub kind: TraceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    /// A process was spawned and queued on the active set.
    Created { pid: LocalPid, prio: Priority },
    /// A process was dispatched.
    Dispatched { pid: LocalPid, prio: Priority },
    /// A process used its whole quantum. `from != to` means it was demoted.
    Expired {
        pid: LocalPid,
        from: Priority,
        to: Priority,
    },
    /// A process blocked on I/O.
    Blocked { pid: LocalPid, prio: Priority },
    /// A blocked process was moved back to the active set.
    Unblocked { pid: LocalPid, prio: Priority },
    /// A process reported termination.
    Terminated {
        pid: LocalPid,
        prio: Priority,
        cpu: SimTime,
        wait: SimTime,
        block: SimTime,
    },
    /// A worker was reaped and its slot released.
    Exited { pid: LocalPid, status: i32 },
    /// The active and expired sets were exchanged.
    Swapped,
}

impl TraceKind {
    pub fn pid(&self) -> Option<LocalPid> {
        match *self {
            TraceKind::Created { pid, .. }
            | TraceKind::Dispatched { pid, .. }
            | TraceKind::Expired { pid, .. }
            | TraceKind::Blocked { pid, .. }
            | TraceKind::Unblocked { pid, .. }
            | TraceKind::Terminated { pid, .. }
            | TraceKind::Exited { pid, .. } => Some(pid),
            TraceKind::Swapped => None,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>20}] ", self.time.to_string())?;
        match &self.kind {
            TraceKind::Created { pid, prio } => write!(f, "CREATE    pid={pid} prio={prio}"),
            TraceKind::Dispatched { pid, prio } => write!(f, "DISPATCH  pid={pid} prio={prio}"),
            TraceKind::Expired { pid, from, to } if from != to => {
                write!(f, "EXPIRE    pid={pid} prio={to} shift={from}->{to}")
            }
            TraceKind::Expired { pid, to, .. } => write!(f, "EXPIRE    pid={pid} prio={to}"),
            TraceKind::Blocked { pid, prio } => write!(f, "BLOCK     pid={pid} prio={prio}"),
            TraceKind::Unblocked { pid, prio } => write!(f, "UNBLOCK   pid={pid} prio={prio}"),
            TraceKind::Terminated {
                pid,
                prio,
                cpu,
                wait,
                block,
            } => write!(
                f,
                "TERMINATE pid={pid} prio={prio} cpu={cpu} wait={wait} block={block}"
            ),
            TraceKind::Exited { pid, status } => write!(f, "EXIT      pid={pid} status={status}"),
            TraceKind::Swapped => write!(f, "SWAP      active<->expired"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, time: SimTime, kind: TraceKind) -> &TraceEvent {
        self.events.push(TraceEvent { time, kind });
        &self.events[self.events.len() - 1]
    }

    /// All events in chronological order.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Local ids in the order they were dispatched.
    pub fn dispatch_order(&self) -> Vec<LocalPid> {
        self.events
            .iter()
            .filter_map(|e| match e.kind {
                TraceKind::Dispatched { pid, .. } => Some(pid),
                _ => None,
            })
            .collect()
    }

    pub fn dispatch_count(&self, pid: LocalPid) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::Dispatched { pid: p, .. } if p == pid))
            .count()
    }

    pub fn swap_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, TraceKind::Swapped))
            .count()
    }

    /// Events concerning one process.
    pub fn for_pid(&self, pid: LocalPid) -> impl Iterator<Item = &TraceEvent> + '_ {
        self.events.iter().filter(move |e| e.kind.pid() == Some(pid))
    }

    /// Pretty-print the trace for debugging.
    pub fn dump(&self) {
        for event in &self.events {
            eprintln!("{event}");
        }
    }
}
