//! Send cache (component C6): the planner's materialised timeline and the
//! "next due" binary search the send loop calls on every tick.
//!
//! `next_due` is a literal port of `binarySearch`/`get_next_time`
//! (`original_source/datapath/tt.c`), using [`slice::partition_point`] in
//! place of the hand-rolled `binarySearch` loop.

extern crate alloc;

use alloc::vec::Vec;

/// Sorted `(send_time, flow_id)` timeline for one macro-period (spec §3,
/// §4.6). Built by [`crate::planner::plan`]; read-only once published.
#[derive(Debug, Clone)]
pub struct SendCache {
    pub(crate) macro_period: u64,
    pub(crate) send_times: Vec<u64>,
    pub(crate) flow_ids: Vec<u16>,
}

impl SendCache {
    /// An empty cache: `macro_period = 1`, no entries (spec §4.5 step 1,
    /// scenario 1).
    pub fn empty() -> Self {
        Self {
            macro_period: 1,
            send_times: Vec::new(),
            flow_ids: Vec::new(),
        }
    }

    #[inline]
    pub fn macro_period(&self) -> u64 {
        self.macro_period
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.send_times.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.send_times.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> impl Iterator<Item = (u64, u16)> + '_ {
        self.send_times.iter().copied().zip(self.flow_ids.iter().copied())
    }

    /// The result of a `next_due` query (spec §4.6).
    ///
    /// `flow_id` is the slot that has *just* come due (`idx`), not the one
    /// the timer is being rearmed toward — the caller transmits for this
    /// flow and rearms for `wait_ns` from now.
    pub fn next_due(&self, now_ns: u64) -> Option<NextDue> {
        if self.send_times.is_empty() {
            return None;
        }
        let n = self.send_times.len();
        let mod_time = now_ns % self.macro_period;

        // Largest idx such that send_times[idx] <= mod_time; wraps to the
        // previous period's last slot when mod_time precedes everything.
        let upper = self.send_times.partition_point(|&t| t <= mod_time);
        let idx = if upper == 0 { n - 1 } else { upper - 1 };
        let next_idx = (idx + 1) % n;

        let wait_ns = if next_idx == 0 {
            self.send_times[0] + self.macro_period - self.send_times[idx]
        } else {
            self.send_times[next_idx] - self.send_times[idx]
        };

        let absolute_send_ns = if mod_time > self.send_times[idx] {
            now_ns + (self.macro_period - mod_time + self.send_times[idx])
        } else {
            now_ns + (self.send_times[idx] - mod_time)
        };

        Some(NextDue {
            idx,
            flow_id: self.flow_ids[idx],
            wait_ns,
            absolute_send_ns,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextDue {
    pub idx: usize,
    pub flow_id: u16,
    pub wait_ns: u64,
    pub absolute_send_ns: u64,
}
