use crate::network::state::ConnectionState;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals shared by the scheduler, retry engine and dispatcher
#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_written: AtomicU64,
    write_failures: AtomicU64,
    retries_sent: AtomicU64,
    retries_exhausted: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn frame_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry_sent(&self) {
        self.retries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retries_exhausted(&self) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, state: ConnectionState, pending_requests: usize) -> ManagerStats {
        ManagerStats {
            state,
            pending_requests,
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            retries_sent: self.retries_sent.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub state: ConnectionState,
    pub pending_requests: usize,
    pub frames_written: u64,
    pub write_failures: u64,
    pub retries_sent: u64,
    pub retries_exhausted: u64,
    pub frames_dropped: u64,
}

impl fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "State: {}, Pending: {}, Written: {} ({} failed), Retries: {}, Exhausted: {}, Dropped: {}",
            self.state,
            self.pending_requests,
            self.frames_written,
            self.write_failures,
            self.retries_sent,
            self.retries_exhausted,
            self.frames_dropped
        )
    }
}
