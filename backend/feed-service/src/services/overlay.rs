//! Optimistic post overlay
//!
//! Holds posts the viewer just created so they show up before the backend
//! confirms them. Every entry owns a cancellable expiry timer; entries are
//! addressed by slot so a timer can only ever remove the entry it was armed
//! for, even if the same post id is re-added later.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{OptimisticPost, Post};

struct Entry {
    slot: u64,
    optimistic: OptimisticPost,
    inserted: Instant,
    timer: Option<AbortHandle>,
}

impl Entry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct OverlayInner {
    /// Newest first
    entries: Vec<Entry>,
    next_slot: u64,
}

impl Drop for OverlayInner {
    fn drop(&mut self) {
        for entry in &mut self.entries {
            entry.cancel_timer();
        }
    }
}

#[derive(Clone)]
pub struct OptimisticPostOverlay {
    inner: Arc<Mutex<OverlayInner>>,
    ttl: Duration,
}

fn lock(inner: &Mutex<OverlayInner>) -> MutexGuard<'_, OverlayInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OptimisticPostOverlay {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OverlayInner::default())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a post ahead of everything else and arm its expiry timer.
    ///
    /// Must be called from within a tokio runtime. Re-adding a post id
    /// replaces the previous entry and its timer.
    pub fn add(&self, post: Post) -> u64 {
        let mut inner = lock(&self.inner);

        if let Some(idx) = inner.entries.iter().position(|e| e.optimistic.post.id == post.id) {
            let mut replaced = inner.entries.remove(idx);
            replaced.cancel_timer();
        }

        let slot = inner.next_slot;
        inner.next_slot += 1;

        let timer = Self::arm_timer(Arc::downgrade(&self.inner), slot, self.ttl);
        debug!(post_id = %post.id, slot, "Optimistic post added");

        inner.entries.insert(
            0,
            Entry {
                slot,
                optimistic: OptimisticPost {
                    post,
                    is_optimistic: true,
                    added_at: Utc::now(),
                },
                inserted: Instant::now(),
                timer: Some(timer),
            },
        );

        slot
    }

    fn arm_timer(inner: Weak<Mutex<OverlayInner>>, slot: u64, ttl: Duration) -> AbortHandle {
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(shared) = inner.upgrade() {
                let mut guard = lock(&shared);
                if let Some(idx) = guard.entries.iter().position(|e| e.slot == slot) {
                    let expired = guard.entries.remove(idx);
                    debug!(post_id = %expired.optimistic.post.id, slot, "Optimistic post expired");
                }
            }
        })
        .abort_handle()
    }

    /// Swap the provisional post in `slot` for its persisted version, keeping
    /// its position and remaining lifetime.
    pub fn reconcile(&self, slot: u64, persisted: Post) -> bool {
        let mut inner = lock(&self.inner);
        match inner.entries.iter_mut().find(|e| e.slot == slot) {
            Some(entry) => {
                entry.optimistic.post = persisted;
                true
            }
            None => false,
        }
    }

    pub fn remove_slot(&self, slot: u64) -> bool {
        let mut inner = lock(&self.inner);
        match inner.entries.iter().position(|e| e.slot == slot) {
            Some(idx) => {
                inner.entries.remove(idx).cancel_timer();
                true
            }
            None => false,
        }
    }

    /// Drop the optimistic copy of `post_id` once the caller has seen it persisted.
    pub fn acknowledge(&self, post_id: &str) -> bool {
        let mut inner = lock(&self.inner);
        match inner.entries.iter().position(|e| e.optimistic.post.id == post_id) {
            Some(idx) => {
                inner.entries.remove(idx).cancel_timer();
                debug!(post_id, "Optimistic post acknowledged");
                true
            }
            None => false,
        }
    }

    /// Remove every entry and cancel every outstanding timer.
    pub fn clear(&self) -> usize {
        let mut inner = lock(&self.inner);
        let cleared = inner.entries.len();
        for mut entry in inner.entries.drain(..) {
            entry.cancel_timer();
        }
        if cleared > 0 {
            debug!(cleared, "Optimistic overlay cleared");
        }
        cleared
    }

    /// Live entries, newest first.
    pub fn entries(&self) -> Vec<OptimisticPost> {
        let inner = lock(&self.inner);
        inner
            .entries
            .iter()
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .map(|e| e.optimistic.clone())
            .collect()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.entries().into_iter().map(|o| o.post).collect()
    }

    pub fn contains(&self, post_id: &str) -> bool {
        self.entries().iter().any(|o| o.post.id == post_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
