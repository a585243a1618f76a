//! Two-level cancellation.
//!
//! Draining stops new spawns and lets in-flight processes run to completion.
//! Aborting terminates every worker at the top of the next tick. Levels only
//! ever rise; an abort requested during a drain wins.

use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const RUN: u8 = 0;
const DRAIN: u8 = 1;
const ABORT: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    level: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_drain(&self) {
        self.level.fetch_max(DRAIN, Ordering::Relaxed);
    }

    pub fn request_abort(&self) {
        self.level.fetch_max(ABORT, Ordering::Relaxed);
    }

    /// True once a drain or an abort was requested.
    pub fn is_draining(&self) -> bool {
        self.level.load(Ordering::Relaxed) >= DRAIN
    }

    pub fn is_aborted(&self) -> bool {
        self.level.load(Ordering::Relaxed) == ABORT
    }

    pub fn is_running(&self) -> bool {
        self.level.load(Ordering::Relaxed) == RUN
    }
}
