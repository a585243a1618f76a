//! Simulated clock.
//!
//! `SimTime` is a seconds + nanoseconds pair. Every mutation carries overflow
//! of the nanosecond field into seconds, so `nsecs < NSEC_PER_SEC` always
//! holds. Arithmetic is add-only; the one subtraction-like operation,
//! [`SimTime::difference`], is absolute so callers never observe a negative
//! time.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

pub const NSEC_PER_SEC: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimTime {
    // Field order matters: the derived Ord compares seconds first.
    pub secs: u64,
    pub nsecs: u64,
}

impl SimTime {
    pub const ZERO: SimTime = SimTime { secs: 0, nsecs: 0 };

    /// Build a time, normalizing `nsecs` into `secs`.
    pub fn new(secs: u64, nsecs: u64) -> Self {
        SimTime {
            secs: secs + nsecs / NSEC_PER_SEC,
            nsecs: nsecs % NSEC_PER_SEC,
        }
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self::new(0, nanos)
    }

    pub fn as_nanos(self) -> u128 {
        self.secs as u128 * NSEC_PER_SEC as u128 + self.nsecs as u128
    }

    /// Add `nanos` and carry into seconds.
    pub fn advance(&mut self, nanos: u64) {
        let total = self.nsecs + nanos % NSEC_PER_SEC;
        self.secs += nanos / NSEC_PER_SEC + total / NSEC_PER_SEC;
        self.nsecs = total % NSEC_PER_SEC;
    }

    /// Absolute elapsed time between `a` and `b`, in either order.
    pub fn difference(a: SimTime, b: SimTime) -> SimTime {
        let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
        if hi.nsecs >= lo.nsecs {
            SimTime {
                secs: hi.secs - lo.secs,
                nsecs: hi.nsecs - lo.nsecs,
            }
        } else {
            SimTime {
                secs: hi.secs - lo.secs - 1,
                nsecs: hi.nsecs + NSEC_PER_SEC - lo.nsecs,
            }
        }
    }

    /// `self - other`, clamped at zero.
    pub fn saturating_sub(self, other: SimTime) -> SimTime {
        if self <= other {
            SimTime::ZERO
        } else {
            SimTime::difference(self, other)
        }
    }

    /// Divide into `count` equal parts. None when `count` is zero.
    pub fn checked_div(self, count: u64) -> Option<SimTime> {
        if count == 0 {
            return None;
        }
        let nanos = self.as_nanos() / count as u128;
        Some(SimTime {
            secs: (nanos / NSEC_PER_SEC as u128) as u64,
            nsecs: (nanos % NSEC_PER_SEC as u128) as u64,
        })
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime::new(self.secs + rhs.secs, self.nsecs + rhs.nsecs)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nsecs)
    }
}
