//! Run queues.
//!
//! A [`BoundedQueue`] is a fixed-capacity FIFO ring of local ids, sized to
//! the process table. Pushing into a full queue drops the id; this mirrors the
//! bounded process table rather than signalling an error.
//!
//! [`RunQueues`] holds two [`QueueSet`]s (one per generation) plus the
//! blocked queue. Which set is active is a single index, so swapping
//! generations is O(1) and never copies queue contents.

use crate::types::{LocalPid, Priority, QUEUE_SET_COUNT};

#[derive(Debug, Clone)]
pub struct BoundedQueue {
    slots: Vec<LocalPid>,
    front: usize,
    len: usize,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        BoundedQueue {
            slots: vec![LocalPid(0); capacity],
            front: 0,
            len: 0,
        }
    }

    /// Append `pid`. Returns false, leaving the queue untouched, when full.
    pub fn push(&mut self, pid: LocalPid) -> bool {
        if self.is_full() {
            return false;
        }
        let rear = (self.front + self.len) % self.slots.len();
        self.slots[rear] = pid;
        self.len += 1;
        true
    }

    /// Remove the head of the queue.
    pub fn pop(&mut self) -> Option<LocalPid> {
        if self.is_empty() {
            return None;
        }
        let pid = self.slots[self.front];
        self.slots[self.front] = LocalPid(0);
        self.front = (self.front + 1) % self.slots.len();
        self.len -= 1;
        Some(pid)
    }

    pub fn peek(&self) -> Option<LocalPid> {
        if self.is_empty() {
            None
        } else {
            Some(self.slots[self.front])
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn contains(&self, pid: LocalPid) -> bool {
        self.iter().any(|p| p == pid)
    }

    /// Ids in FIFO order, without consuming.
    pub fn iter(&self) -> impl Iterator<Item = LocalPid> + '_ {
        (0..self.len).map(move |i| self.slots[(self.front + i) % self.slots.len()])
    }

    /// Remove a specific id, keeping the order of the others. Returns true if found.
    pub fn remove(&mut self, pid: LocalPid) -> bool {
        if !self.contains(pid) {
            return false;
        }
        let kept: Vec<LocalPid> = self.iter().filter(|&p| p != pid).collect();
        self.front = 0;
        self.len = 0;
        self.slots.fill(LocalPid(0));
        for p in kept {
            self.push(p);
        }
        true
    }
}

/// One generation of run queues, indexed by priority.
#[derive(Debug, Clone)]
pub struct QueueSet {
    levels: Vec<BoundedQueue>,
}

impl QueueSet {
    pub fn new(capacity: usize) -> Self {
        QueueSet {
            levels: (0..QUEUE_SET_COUNT)
                .map(|_| BoundedQueue::new(capacity))
                .collect(),
        }
    }

    pub fn level(&self, prio: Priority) -> &BoundedQueue {
        &self.levels[prio]
    }

    pub fn level_mut(&mut self, prio: Priority) -> &mut BoundedQueue {
        &mut self.levels[prio]
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|q| q.is_empty())
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(|q| q.len()).sum()
    }

    /// Pop from the highest-priority non-empty level.
    pub fn pop_highest(&mut self) -> Option<(Priority, LocalPid)> {
        self.levels
            .iter_mut()
            .enumerate()
            .find_map(|(prio, q)| q.pop().map(|pid| (prio, pid)))
    }

    pub fn contains(&self, pid: LocalPid) -> bool {
        self.levels.iter().any(|q| q.contains(pid))
    }

    pub fn remove(&mut self, pid: LocalPid) -> bool {
        self.levels.iter_mut().any(|q| q.remove(pid))
    }

    /// Contents per level, highest priority first.
    pub fn snapshot(&self) -> Vec<Vec<LocalPid>> {
        self.levels.iter().map(|q| q.iter().collect()).collect()
    }
}

/// Active and expired generations plus the blocked queue.
#[derive(Debug, Clone)]
pub struct RunQueues {
    sets: [QueueSet; 2],
    active: usize,
    blocked: BoundedQueue,
}

impl RunQueues {
    pub fn new(capacity: usize) -> Self {
        RunQueues {
            sets: [QueueSet::new(capacity), QueueSet::new(capacity)],
            active: 0,
            blocked: BoundedQueue::new(capacity),
        }
    }

    pub fn active(&self) -> &QueueSet {
        &self.sets[self.active]
    }

    pub fn active_mut(&mut self) -> &mut QueueSet {
        &mut self.sets[self.active]
    }

    pub fn expired(&self) -> &QueueSet {
        &self.sets[1 - self.active]
    }

    pub fn expired_mut(&mut self) -> &mut QueueSet {
        &mut self.sets[1 - self.active]
    }

    pub fn blocked(&self) -> &BoundedQueue {
        &self.blocked
    }

    pub fn blocked_mut(&mut self) -> &mut BoundedQueue {
        &mut self.blocked
    }

    /// Exchange the active and expired generations.
    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }

    /// Total number of ids held in any queue.
    pub fn len(&self) -> usize {
        self.sets[0].len() + self.sets[1].len() + self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queues (across both sets and the blocked queue) holding `pid`.
    pub fn occurrences(&self, pid: LocalPid) -> usize {
        let in_sets: usize = self
            .sets
            .iter()
            .flat_map(|set| set.levels.iter())
            .map(|q| q.iter().filter(|&p| p == pid).count())
            .sum();
        in_sets + self.blocked.iter().filter(|&p| p == pid).count()
    }

    /// Remove `pid` from whichever queue holds it.
    pub fn remove(&mut self, pid: LocalPid) -> bool {
        self.sets[0].remove(pid) || self.sets[1].remove(pid) || self.blocked.remove(pid)
    }
}
