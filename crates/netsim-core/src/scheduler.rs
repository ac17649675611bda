//! Discrete-event scheduler: a virtual-time priority queue of timed events.
//!
//! Mirrors §4.1 of the simulator design: events fire in strictly increasing
//! `(fire_time, sequence)` order, a monotonic sequence counter breaks ties so
//! two events scheduled for the same instant run in insertion order, and
//! cancellation is a lazy tombstone rather than a heap mutation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::trace;

/// Opaque handle to a scheduled event, returned by [`Scheduler::add`].
///
/// Holds the event's sequence number so `cancel` can tombstone it without
/// walking the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

struct Event {
    fire_time: f64,
    sequence: u64,
    handler: Box<dyn FnOnce(&mut Scheduler)>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time && self.sequence == other.sequence
    }
}
impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest fire_time (and,
        // among ties, the lowest sequence number) pops first.
        other
            .fire_time
            .partial_cmp(&self.fire_time)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Virtual-time event queue. Single-threaded, cooperative: a handler always
/// runs to completion before the next one starts (§5).
pub struct Scheduler {
    current_time: f64,
    queue: BinaryHeap<Event>,
    sequence: u64,
    cancelled: HashSet<u64>,
    stop: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            current_time: 0.0,
            queue: BinaryHeap::new(),
            sequence: 0,
            cancelled: HashSet::new(),
            stop: false,
        }
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Schedule `handler` to fire at `current_time + delay`. `delay` must be
    /// non-negative. Returns a handle usable with [`Scheduler::cancel`].
    pub fn add<F>(&mut self, delay: f64, handler: F) -> Handle
    where
        F: FnOnce(&mut Scheduler) + 'static,
    {
        debug_assert!(delay >= 0.0, "scheduler delay must be non-negative");
        let sequence = self.sequence;
        self.sequence += 1;
        self.queue.push(Event {
            fire_time: self.current_time + delay,
            sequence,
            handler: Box::new(handler),
        });
        Handle(sequence)
    }

    /// Cancel a previously scheduled event. No-op if the handle has already
    /// fired or was already cancelled.
    pub fn cancel(&mut self, handle: Handle) {
        self.cancelled.insert(handle.0);
    }

    /// Dispatch events until the queue is empty.
    pub fn run(&mut self) {
        self.stop = false;
        while !self.stop {
            let event = match self.queue.pop() {
                Some(e) => e,
                None => break,
            };
            if self.cancelled.remove(&event.sequence) {
                continue;
            }
            self.current_time = event.fire_time;
            trace::trace("scheduler", &format!("firing event {}", event.sequence));
            (event.handler)(self);
        }
    }

    /// Run for at most `delay` units of virtual time, then reset time to 0.
    /// Other still-pending events are left in the queue (matching the
    /// Python original's `run_until`, which leaves the underlying
    /// `sched.scheduler` populated).
    pub fn run_until(&mut self, delay: f64) {
        self.add(delay, |s| s.stop = true);
        self.run();
        self.current_time = 0.0;
    }

    /// Number of events still pending (including tombstoned ones awaiting pop).
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Zero `current_time` and drop all pending (including cancelled) events.
    pub fn reset(&mut self) {
        self.current_time = 0.0;
        self.queue.clear();
        self.cancelled.clear();
        self.stop = false;
    }

    /// Run `f` against a freshly reset scheduler, then reset again. The
    /// idiomatic-Rust analogue of the Python original's
    /// `with Sim.scheduler: ...` context manager.
    pub fn scoped_run<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Scheduler),
    {
        self.reset();
        f(self);
        self.run();
        self.reset();
    }
}
