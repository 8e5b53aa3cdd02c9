//! Admission control for concurrently active sessions.
//!
//! Pure bookkeeping: the scheduler tracks which session IDs hold a slot
//! and which wait in FIFO order. Spawning the actual upload tasks is the
//! engine's job, so every method here is synchronous and lock-free to
//! test in isolation.

use std::collections::{HashSet, VecDeque};

/// Bounds how many sessions may be active at once; everything else
/// queues FIFO.
pub struct QueueScheduler {
    max_concurrent: usize,
    active: HashSet<String>,
    queue: VecDeque<String>,
    /// While gated (queue-wide pause), no admissions happen at all.
    gated: bool,
}

impl QueueScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            active: HashSet::new(),
            queue: VecDeque::new(),
            gated: false,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains(id)
    }

    /// Admits `id` if a slot is free, otherwise queues it.
    /// Returns `true` when the session got a slot and should start now.
    pub fn admit(&mut self, id: &str) -> bool {
        if self.active.contains(id) {
            return false;
        }
        if !self.gated && self.active.len() < self.max_concurrent {
            self.active.insert(id.to_string());
            true
        } else {
            if !self.queue.iter().any(|q| q == id) {
                self.queue.push_back(id.to_string());
            }
            false
        }
    }

    /// Releases the slot held by `id` and returns the next session to
    /// admit, if any. While gated, the queue is held back.
    pub fn release(&mut self, id: &str) -> Option<String> {
        self.active.remove(id);
        if self.gated || self.active.len() >= self.max_concurrent {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.active.insert(next.clone());
        Some(next)
    }

    /// Removes a queued (never admitted) session. Returns `true` if it
    /// was in the queue.
    pub fn remove_queued(&mut self, id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|q| q != id);
        self.queue.len() != before
    }

    /// Changes the concurrency limit. Returns sessions newly admitted
    /// from the queue when the limit was raised.
    pub fn set_limit(&mut self, max_concurrent: usize) -> Vec<String> {
        self.max_concurrent = max_concurrent.max(1);
        self.fill_slots()
    }

    /// Stops all admissions (queue-wide pause).
    pub fn gate(&mut self) {
        self.gated = true;
    }

    pub fn is_gated(&self) -> bool {
        self.gated
    }

    /// Lifts the gate and returns sessions admitted into free slots.
    pub fn ungate(&mut self) -> Vec<String> {
        self.gated = false;
        self.fill_slots()
    }

    fn fill_slots(&mut self) -> Vec<String> {
        let mut admitted = Vec::new();
        if self.gated {
            return admitted;
        }
        while self.active.len() < self.max_concurrent {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.active.insert(next.clone());
            admitted.push(next);
        }
        admitted
    }
}
