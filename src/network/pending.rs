use crate::messages::{Envelope, MessageId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Bookkeeping for one request awaiting a correlated reply
#[derive(Debug)]
pub struct PendingEntry {
    pub sent_at: Instant,
    pub retries: u32,
    generation: u64,
    envelope: Arc<dyn Envelope>,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    pub fn route(&self) -> &str {
        self.envelope.route().unwrap_or_default()
    }

    pub fn envelope(&self) -> &Arc<dyn Envelope> {
        &self.envelope
    }
}

/// What a fired timer should do next
#[derive(Debug)]
pub(crate) enum TimeoutDecision {
    /// The entry was resolved or replaced; nothing to do
    Stale,
    /// Resend the request and wait another interval
    Retry {
        envelope: Arc<dyn Envelope>,
        attempt: u32,
    },
    /// Retries are used up; the entry has been removed
    Exhausted(PendingEntry),
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<MessageId, PendingEntry>,
    next_generation: u64,
}

/// Outstanding requests keyed by message id.
///
/// Every lookup, insert and removal happens under one lock, so a reply racing
/// a timer resolves to exactly one of "resolved" or "one more retry sent".
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `envelope`, starting its timer while the table is locked.
    ///
    /// `start_timer` receives the generation the timer must present when it
    /// fires. A previous entry under the same id is replaced and its timer
    /// aborted.
    pub(crate) fn insert_with<F>(&self, envelope: Arc<dyn Envelope>, start_timer: F)
    where
        F: FnOnce(u64) -> Option<AbortHandle>,
    {
        let mut inner = self.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let id = envelope.id();
        let timer = start_timer(generation);
        let entry = PendingEntry {
            sent_at: Instant::now(),
            retries: 0,
            generation,
            envelope,
            timer,
        };

        if let Some(previous) = inner.entries.insert(id, entry) {
            warn!(id, "Replacing a pending request that reused an in-flight id");
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }
    }

    /// Remove the entry for `id` and cancel its timer
    pub fn resolve(&self, id: MessageId) -> Option<PendingEntry> {
        let mut entry = self.lock().entries.remove(&id)?;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        debug!(id, retries = entry.retries, "Pending request resolved");
        Some(entry)
    }

    /// Apply a timer firing for `id` against the retry budget
    pub(crate) fn on_timeout(
        &self,
        id: MessageId,
        generation: u64,
        max_retries: u32,
    ) -> TimeoutDecision {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&id) else {
            return TimeoutDecision::Stale;
        };
        if entry.generation != generation {
            return TimeoutDecision::Stale;
        }

        if entry.retries < max_retries {
            entry.retries += 1;
            return TimeoutDecision::Retry {
                envelope: Arc::clone(&entry.envelope),
                attempt: entry.retries,
            };
        }

        match inner.entries.remove(&id) {
            Some(mut entry) => {
                // The caller is the timer itself.
                entry.timer = None;
                TimeoutDecision::Exhausted(entry)
            }
            None => TimeoutDecision::Stale,
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// Retries already spent on `id`, if it is still pending
    pub fn retries(&self, id: MessageId) -> Option<u32> {
        self.lock().entries.get(&id).map(|entry| entry.retries)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
