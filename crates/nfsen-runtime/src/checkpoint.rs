//! Per-source checkpoint bookkeeping for out-of-order completions.
//!
//! Days are submitted in ascending order but may finish in any order inside a
//! concurrency window. The checkpoint only moves over the contiguous prefix of
//! settled days, so a resume never skips a day that was still in flight.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveDate;

#[derive(Debug, Default)]
pub struct CheckpointTracker {
    /// Submitted days not yet folded into the prefix, ascending.
    pending: VecDeque<NaiveDate>,
    /// Outcome of settled days that are not yet at the front of `pending`.
    settled: HashMap<NaiveDate, bool>,
    committed: Option<NaiveDate>,
}

impl CheckpointTracker {
    pub fn new(committed: Option<NaiveDate>) -> Self {
        Self {
            committed,
            ..Default::default()
        }
    }

    /// Register a day about to be dispatched. Days must arrive ascending.
    pub fn submit(&mut self, day: NaiveDate) {
        debug_assert!(self.pending.back().map_or(true, |last| *last < day));
        self.pending.push_back(day);
    }

    /// Record the outcome of `day`.
    ///
    /// Returns the new checkpoint when the contiguous prefix now ends in a
    /// successful day later than the current checkpoint. Failed days inside the
    /// prefix are passed over; failed days after the last success keep the
    /// checkpoint where it is so the next resume retries them.
    pub fn settle(&mut self, day: NaiveDate, succeeded: bool) -> Option<NaiveDate> {
        self.settled.insert(day, succeeded);

        let mut advanced = None;
        while let Some(front) = self.pending.front().copied() {
            let Some(ok) = self.settled.remove(&front) else {
                break;
            };
            self.pending.pop_front();
            if ok && self.committed.map_or(true, |c| front > c) {
                self.committed = Some(front);
                advanced = Some(front);
            }
        }
        advanced
    }

    pub fn committed(&self) -> Option<NaiveDate> {
        self.committed
    }

    /// `true` once every submitted day has settled.
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}
