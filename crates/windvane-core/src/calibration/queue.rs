//! Calibration queue
//!
//! The only path from the acquisition loop to the calibration engine. The
//! loop offers every converted reading; the queue keeps them only while the
//! engine is collecting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::convert::Reading;

/// Bounded FIFO of readings, oldest dropped first
#[derive(Debug)]
pub struct CalibrationQueue {
    items: Mutex<VecDeque<Reading>>,
    capacity: usize,
    collecting: AtomicBool,
    dropped: AtomicU64,
}

impl CalibrationQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            collecting: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a reading if the engine is collecting
    pub fn offer(&self, reading: Reading) {
        if !self.is_collecting() {
            return;
        }
        let mut items = self.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(reading);
    }

    /// Start collecting with an empty queue
    pub fn begin(&self) {
        self.lock().clear();
        self.collecting.store(true, Ordering::Release);
    }

    /// Stop collecting and discard anything left over
    pub fn end(&self) {
        self.collecting.store(false, Ordering::Release);
        self.lock().clear();
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    /// Drain everything queued, oldest first
    pub fn take_all(&self) -> Vec<Reading> {
        self.lock().drain(..).collect()
    }

    /// Readings evicted because the engine fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Reading>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}
