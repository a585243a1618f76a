//! Process control blocks and the bounded process table.
//!
//! The table is owned by the engine alone. Workers never see it; whatever
//! they report arrives through the transport as typed replies.

use bitvec::prelude::*;

use crate::clock::SimTime;
use crate::types::{LocalPid, Priority, RealPid, PRIO_REALTIME};

/// Lifecycle state of a simulated process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcState {
    /// Slot is unused.
    #[default]
    Free,
    /// Queued on the active or expired set.
    Ready,
    /// Dispatched and owning the (single) CPU.
    Running,
    /// Waiting on simulated I/O in the blocked queue.
    Blocked,
    /// Reported termination; waiting to be reaped.
    Terminated,
}

#[derive(Debug, Clone, Default)]
pub struct Pcb {
    pub local: LocalPid,
    pub real: RealPid,
    pub priority: Priority,
    pub state: ProcState,
    /// Clock value at spawn.
    pub arrival: SimTime,
    /// Clock value at termination.
    pub exit: SimTime,
    /// CPU consumed across all bursts.
    pub cpu: SimTime,
    /// CPU consumed at the current priority level; reset on demotion.
    pub queue: SimTime,
    /// Time spent blocked on I/O.
    pub block: SimTime,
    /// Time spent runnable but not running, settled at termination.
    pub wait: SimTime,
    /// Set while blocked.
    pub blocked_since: Option<SimTime>,
}

impl Pcb {
    pub fn is_realtime(&self) -> bool {
        self.priority == PRIO_REALTIME
    }

    /// Total time from arrival to termination.
    pub fn turnaround(&self) -> SimTime {
        SimTime::difference(self.exit, self.arrival)
    }

    /// Settle wait time as time in system minus CPU and block time.
    pub fn settle_wait(&mut self) {
        self.wait = self.turnaround().saturating_sub(self.cpu).saturating_sub(self.block);
    }
}

/// Fixed-size process table. Bit `i` of the occupancy vector is set iff
/// slot `i + 1` is in use.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    slots: Vec<Pcb>,
    occupied: BitVec<u64, Lsb0>,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        ProcessTable {
            slots: vec![Pcb::default(); capacity],
            occupied: bitvec![u64, Lsb0; 0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.occupied.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied.not_any()
    }

    pub fn is_full(&self) -> bool {
        self.occupied.all()
    }

    /// Lowest free local id, if any.
    pub fn lowest_free(&self) -> Option<LocalPid> {
        self.occupied.first_zero().map(|bit| LocalPid(bit as u32 + 1))
    }

    pub fn is_occupied(&self, pid: LocalPid) -> bool {
        Self::bit(pid).is_some_and(|bit| bit < self.occupied.len() && self.occupied[bit])
    }

    /// Claim the lowest free slot and initialize it.
    pub fn claim(&mut self, real: RealPid, priority: Priority, now: SimTime) -> Option<LocalPid> {
        let local = self.lowest_free()?;
        self.claim_slot(local, real, priority, now).then_some(local)
    }

    /// Initialize a specific free slot, as found by [`Self::lowest_free`].
    /// Returns false if the id is out of range or already in use.
    pub fn claim_slot(
        &mut self,
        local: LocalPid,
        real: RealPid,
        priority: Priority,
        now: SimTime,
    ) -> bool {
        let Some(bit) = Self::bit(local).filter(|&bit| bit < self.slots.len()) else {
            return false;
        };
        if self.occupied[bit] {
            return false;
        }
        self.occupied.set(bit, true);
        self.slots[bit] = Pcb {
            local,
            real,
            priority,
            state: ProcState::Ready,
            arrival: now,
            ..Pcb::default()
        };
        true
    }

    /// Zero the slot and return what it held.
    pub fn release(&mut self, local: LocalPid) -> Option<Pcb> {
        if !self.is_occupied(local) {
            return None;
        }
        let bit = Self::bit(local)?;
        self.occupied.set(bit, false);
        Some(std::mem::take(&mut self.slots[bit]))
    }

    pub fn get(&self, local: LocalPid) -> Option<&Pcb> {
        if self.is_occupied(local) {
            Self::bit(local).map(|bit| &self.slots[bit])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, local: LocalPid) -> Option<&mut Pcb> {
        if self.is_occupied(local) {
            Self::bit(local).map(|bit| &mut self.slots[bit])
        } else {
            None
        }
    }

    /// Occupied entries in local-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Pcb> + '_ {
        self.occupied.iter_ones().map(move |bit| &self.slots[bit])
    }

    fn bit(pid: LocalPid) -> Option<usize> {
        (pid.0 as usize).checked_sub(1)
    }
}
