//! Bounded, insertion-ordered set of recently processed identities.
//!
//! One cache instance is shared by the stream workers, the startup catch-up
//! scan, and the DM command checker; DM message identities reuse the same key
//! space under a `dm:` prefix. Best-effort only - the set is not durable
//! across restarts.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// FIFO-evicting set of already-seen identity strings.
pub struct DedupCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Atomically check membership and insert if absent.
    ///
    /// Returns `true` when the identity was already present. Call this before
    /// any expensive work so two near-simultaneous events for the same post
    /// cannot both proceed.
    pub fn mark_and_check(&self, identity: &str) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.seen.contains(identity) {
            return true;
        }

        inner.seen.insert(identity.to_string());
        inner.order.push_back(identity.to_string());

        // Strict FIFO eviction: drop the single oldest entry once over capacity.
        if inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }

        false
    }

    /// Number of identities currently held.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.order.len(),
            Err(poisoned) => poisoned.into_inner().order.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
