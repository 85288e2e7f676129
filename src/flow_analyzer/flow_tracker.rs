// flow_tracker.rs
//
// Live per-road vehicle counters. Every cell owns four counters, one per
// outgoing direction; a counter holds the number of taxis currently driving
// along that directed road, or NO_EDGE when the road is closed.

use crate::simulation_engine::cell::{Cell, Direction};
use std::sync::atomic::{AtomicI32, Ordering};

/// Stored in a counter whose road does not exist.
pub const NO_EDGE: i32 = -1;

pub struct FlowTracker {
    rows: usize,
    cols: usize,
    counters: Vec<[AtomicI32; 4]>,
}

impl FlowTracker {
    /// Creates a tracker where every road is marked as missing.
    pub fn new(rows: usize, cols: usize) -> Self {
        let counters = (0..rows * cols)
            .map(|_| std::array::from_fn(|_| AtomicI32::new(NO_EDGE)))
            .collect();
        Self {
            rows,
            cols,
            counters,
        }
    }

    fn counter(&self, from: Cell, dir: Direction) -> Option<&AtomicI32> {
        if from.row < 0 || from.col < 0 {
            return None;
        }
        let (row, col) = (from.row as usize, from.col as usize);
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(&self.counters[row * self.cols + col][dir.index()])
    }

    fn directed(&self, a: Cell, b: Cell) -> Option<&AtomicI32> {
        a.direction_to(b).and_then(|dir| self.counter(a, dir))
    }

    /// A taxi starts driving from `a` to `b`. Only the a→b counter moves.
    pub fn add_flow(&self, a: Cell, b: Cell) {
        if let Some(counter) = self.directed(a, b) {
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v != NO_EDGE).then_some(v + 1)
            });
        }
    }

    /// A taxi finished driving from `a` to `b`. Never drops below zero.
    pub fn sub_flow(&self, a: Cell, b: Cell) {
        if let Some(counter) = self.directed(a, b) {
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v > 0).then_some(v - 1)
            });
        }
    }

    /// Current number of taxis on the directed road a→b, `None` if there is no such road.
    pub fn get_flow(&self, a: Cell, b: Cell) -> Option<u32> {
        let value = self.directed(a, b)?.load(Ordering::SeqCst);
        (value != NO_EDGE).then_some(value as u32)
    }

    /// Both directions of a newly opened road start empty.
    pub(crate) fn open_edge(&self, a: Cell, dir: Direction) {
        self.store_edge(a, dir, 0);
    }

    pub(crate) fn close_edge(&self, a: Cell, dir: Direction) {
        self.store_edge(a, dir, NO_EDGE);
    }

    fn store_edge(&self, a: Cell, dir: Direction, value: i32) {
        if let Some(counter) = self.counter(a, dir) {
            counter.store(value, Ordering::SeqCst);
        }
        if let Some(counter) = self.counter(a.step(dir), dir.opposite()) {
            counter.store(value, Ordering::SeqCst);
        }
    }

    /// Brings sentinels in line with the road map. Counters of existing roads
    /// keep their live value; only missing roads and fresh roads are touched.
    pub fn sync_with(&self, has_edge: impl Fn(Cell, Direction) -> bool) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let cell = Cell::new(row as i32, col as i32);
                for dir in Direction::ALL {
                    let counter = &self.counters[row * self.cols + col][dir.index()];
                    if has_edge(cell, dir) {
                        let _ = counter.compare_exchange(
                            NO_EDGE,
                            0,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        );
                    } else {
                        counter.store(NO_EDGE, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    /// Sum of all live counters.
    pub fn total_flow(&self) -> u64 {
        self.counters
            .iter()
            .flat_map(|slots| slots.iter())
            .map(|c| c.load(Ordering::SeqCst))
            .filter(|&v| v > 0)
            .map(|v| v as u64)
            .sum()
    }
}
