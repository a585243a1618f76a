//! Newtype wrappers and constants for domain concepts.
//!
//! Local ids index the bounded process table and are reused; real ids are
//! whatever the worker backend hands back (an OS pid for forked workers).
//! Keeping them as distinct newtypes stops one from being used as the other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Simulated process identifier: a slot in the process table, starting at 1.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LocalPid(pub u32);

/// Identifier the worker backend assigned to a worker (OS pid for real workers).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RealPid(pub i32);

impl fmt::Display for LocalPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RealPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue index. 0 is real-time and the highest priority.
pub type Priority = usize;

/// Number of priority levels in each queue set.
pub const QUEUE_SET_COUNT: usize = 4;

/// Real-time level. Real-time processes never age and never leave the active set.
pub const PRIO_REALTIME: Priority = 0;

/// Level every normal process starts at.
pub const PRIO_NORMAL: Priority = 1;

/// Lowest level; processes here are not demoted further.
pub const PRIO_LOWEST: Priority = QUEUE_SET_COUNT - 1;

/// Workers exit with this offset plus their local id.
pub const EXIT_STATUS_OFFSET: i32 = 20;
