//! Flow table (component C4): dense `flow_id → descriptor` map with
//! grow/shrink and deferred reclamation.
//!
//! The growth/shrink rules (I3–I5) are a direct port of `tt_table_alloc` /
//! `tt_table_realloc` / `tt_table_item_insert` / `tt_table_delete_item`
//! (`original_source/datapath/tt.c`): same `TT_TABLE_SIZE_MIN`, same
//! "realloc to `flow_id + MIN` on overflow", same "halve once `count <=
//! max/3` and `max >= 2*MIN`" shrink rule. `FlowTable` itself takes the
//! shape of `drivers/src/net/neighbor.rs`'s dense entry list; publication
//! uses [`tt_lib::epoch`] instead of RCU, matching the grace-period contract
//! `call_rcu(&old->rcu, rcu_free_tt_table)` describes.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicPtr, Ordering};
use log::debug;

use tt_lib::epoch::Epoch;

use crate::error::TtError;

/// Minimum table size (I3); matches `TT_TABLE_SIZE_MIN`.
pub const MIN_TABLE_SIZE: u16 = 16;

/// Immutable once inserted; replaced wholesale by a later insert of the same
/// `flow_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowDescriptor {
    pub flow_id: u16,
    pub buffer_id: u32,
    pub period: u64,
    pub offset: u64,
    pub length: u32,
}

/// A dense `flow_id → descriptor` table. Operations are pure: each returns a
/// new table for the caller to publish, rather than mutating in place —
/// mirroring `tt_table_item_insert`/`tt_table_delete_item` returning a
/// (possibly reallocated) `struct tt_table *`.
#[derive(Debug, Clone)]
pub struct FlowTable {
    slots: Vec<Option<FlowDescriptor>>,
    count: u16,
}

impl FlowTable {
    /// Create an empty table with `max = clamp_low(size, MIN_TABLE_SIZE)`.
    pub fn alloc(size: u16) -> Result<Self, TtError> {
        let max = size.max(MIN_TABLE_SIZE) as usize;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(max)
            .map_err(|_| TtError::OutOfMemory)?;
        slots.resize(max, None);
        Ok(Self { slots, count: 0 })
    }

    #[inline]
    pub fn max(&self) -> u16 {
        self.slots.len() as u16
    }

    /// I1: number of occupied slots.
    #[inline]
    pub fn num_items(&self) -> u16 {
        self.count
    }

    /// Constant-time, wait-free: `None` if `flow_id >= max` or the slot is
    /// empty.
    #[inline]
    pub fn lookup(&self, flow_id: u16) -> Option<&FlowDescriptor> {
        self.slots.get(flow_id as usize)?.as_ref()
    }

    /// Insert or replace `descriptor`. Reallocates to `flow_id +
    /// MIN_TABLE_SIZE` first if `flow_id >= max` (I5).
    pub fn insert(&self, descriptor: FlowDescriptor) -> Result<Self, TtError> {
        let flow_id = descriptor.flow_id;
        let mut table = if flow_id >= self.max() {
            self.realloc(flow_id + MIN_TABLE_SIZE)?
        } else {
            self.clone()
        };
        let slot = &mut table.slots[flow_id as usize];
        if slot.is_none() {
            table.count += 1;
        }
        *slot = Some(descriptor);
        Ok(table)
    }

    /// Clear `flow_id`'s slot, then apply the shrink rule (I4). If shrink
    /// allocation fails, the larger table is kept and the delete still
    /// succeeds — matching `tt_table_delete_item`'s fallback.
    pub fn delete(&self, flow_id: u16) -> Self {
        let mut table = self.clone();
        if let Some(slot) = table.slots.get_mut(flow_id as usize) {
            if slot.take().is_some() {
                table.count -= 1;
            }
        }

        let max = table.max();
        if max >= MIN_TABLE_SIZE * 2 && table.count <= max / 3 {
            match table.realloc(max / 2) {
                Ok(shrunk) => return shrunk,
                Err(_) => {
                    debug!("tt table: shrink allocation failed, keeping larger table");
                }
            }
        }
        table
    }

    fn realloc(&self, size: u16) -> Result<Self, TtError> {
        let mut grown = Self::alloc(size)?;
        for slot in self.slots.iter() {
            if let Some(descriptor) = slot {
                if (descriptor.flow_id as usize) < grown.slots.len() {
                    grown.slots[descriptor.flow_id as usize] = Some(*descriptor);
                }
            }
        }
        grown.count = self.count;
        Ok(grown)
    }
}

/// Epoch-guarded published handle to a [`FlowTable`] (spec §5: "published by
/// a single store-release of the table handle; readers load-acquire").
pub struct PublishedTable {
    current: AtomicPtr<FlowTable>,
    epoch: Epoch,
}

// SAFETY: all access to `current` goes through acquire/release atomics; the
// pointee is only ever read, never mutated in place.
unsafe impl Send for PublishedTable {}
unsafe impl Sync for PublishedTable {}

impl PublishedTable {
    pub fn new(initial: FlowTable) -> Self {
        let ptr = Box::into_raw(Box::new(initial));
        Self {
            current: AtomicPtr::new(ptr),
            epoch: Epoch::new(),
        }
    }

    /// Enter a read-side critical section and borrow the currently published
    /// table. Never blocks, never allocates.
    pub fn enter(&self) -> TableGuard<'_> {
        let reader = self.epoch.enter();
        // SAFETY: the pointee is only freed after `defer`, which happens
        // after this load; the reader guard keeps it alive until dropped.
        let table = unsafe { &*self.current.load(Ordering::Acquire) };
        TableGuard {
            table,
            _reader: reader,
        }
    }

    /// Publish `new`, retiring the previous table for deferred reclamation.
    pub fn publish(&self, new: FlowTable) {
        let new_ptr = Box::into_raw(Box::new(new));
        let old_ptr = self.current.swap(new_ptr, Ordering::AcqRel);
        // SAFETY: `old_ptr` was published by a prior `publish`/`new` call and
        // is no longer reachable via `current`; `defer` delays the actual
        // free until no reader that loaded it is still active.
        let old = unsafe { Box::from_raw(old_ptr) };
        self.epoch.defer(old);
    }

    /// Snapshot as an owned, shareable clone (used by the planner, which
    /// needs to iterate without holding up table mutation).
    pub fn snapshot(&self) -> Arc<FlowTable> {
        Arc::new(self.enter().table.clone())
    }
}

impl Drop for PublishedTable {
    fn drop(&mut self) {
        let ptr = self.current.load(Ordering::Acquire);
        // SAFETY: no other reference to `self` exists during `drop`.
        drop(unsafe { Box::from_raw(ptr) });
    }
}

/// RAII read-side guard returned by [`PublishedTable::enter`].
pub struct TableGuard<'a> {
    table: &'a FlowTable,
    _reader: tt_lib::epoch::EpochGuard<'a>,
}

impl core::ops::Deref for TableGuard<'_> {
    type Target = FlowTable;

    fn deref(&self) -> &FlowTable {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn descriptor(flow_id: u16) -> FlowDescriptor {
        FlowDescriptor {
            flow_id,
            buffer_id: flow_id as u32,
            period: 1_000_000,
            offset: 0,
            length: 64,
        }
    }

    #[test]
    fn alloc_clamps_to_min_size() {
        let t = FlowTable::alloc(1).unwrap();
        assert_eq!(t.max(), MIN_TABLE_SIZE);
    }

    #[test]
    fn insert_sets_flow_id_equal_to_index() {
        let t = FlowTable::alloc(MIN_TABLE_SIZE).unwrap();
        let t = t.insert(descriptor(3)).unwrap();
        assert_eq!(t.lookup(3).unwrap().flow_id, 3);
        assert_eq!(t.num_items(), 1);
    }

    #[test]
    fn insert_past_max_reallocates_and_preserves_existing() {
        let t = FlowTable::alloc(MIN_TABLE_SIZE).unwrap();
        let t = t.insert(descriptor(0)).unwrap();
        let t = t.insert(descriptor(20)).unwrap();
        assert_eq!(t.max(), 20 + MIN_TABLE_SIZE);
        assert_eq!(t.lookup(0).unwrap().flow_id, 0);
        assert_eq!(t.lookup(20).unwrap().flow_id, 20);
        assert_eq!(t.num_items(), 2);
    }

    #[test]
    fn delete_decrements_count_and_clears_slot() {
        let t = FlowTable::alloc(MIN_TABLE_SIZE).unwrap();
        let t = t.insert(descriptor(3)).unwrap();
        let t = t.delete(3);
        assert!(t.lookup(3).is_none());
        assert_eq!(t.num_items(), 0);
    }

    #[test]
    fn shrink_rule_halves_once_count_drops_to_a_third_of_max() {
        let mut t = FlowTable::alloc(MIN_TABLE_SIZE).unwrap();
        for id in 0..32 {
            t = t.insert(descriptor(id)).unwrap();
        }
        assert_eq!(t.max(), 32);
        for id in 11..32 {
            t = t.delete(id);
        }
        // count == 11, max/3 == 10 -> 11 > 10, no shrink yet.
        assert_eq!(t.max(), 32);
        assert_eq!(t.num_items(), 11);
        t = t.delete(10);
        // count == 10 == 32/3, shrinks to 16.
        assert_eq!(t.num_items(), 10);
        assert_eq!(t.max(), 16);
    }

    #[test]
    fn published_table_readers_see_consistent_snapshot_across_publish() {
        let published = PublishedTable::new(FlowTable::alloc(MIN_TABLE_SIZE).unwrap());
        let guard = published.enter();
        assert!(guard.lookup(3).is_none());
        let replacement = FlowTable::alloc(MIN_TABLE_SIZE)
            .unwrap()
            .insert(descriptor(3))
            .unwrap();
        published.publish(replacement);
        // The old guard still observes the pre-publish snapshot.
        assert!(guard.lookup(3).is_none());
        drop(guard);
        assert_eq!(published.enter().lookup(3).unwrap().flow_id, 3);
    }

    proptest! {
        /// P1: after any sequence of inserts/deletes, `count` matches the
        /// number of occupied slots and every occupied slot's descriptor has
        /// `flow_id == index`.
        #[test]
        fn p1_count_and_flow_id_identity_hold(
            ops in prop::collection::vec((any::<bool>(), 0u16..64), 0..40)
        ) {
            let mut t = FlowTable::alloc(MIN_TABLE_SIZE).unwrap();
            for (insert, flow_id) in ops {
                t = if insert {
                    t.insert(descriptor(flow_id)).unwrap()
                } else {
                    t.delete(flow_id)
                };
                let occupied = (0..t.max())
                    .filter(|&id| t.lookup(id).is_some())
                    .count() as u16;
                prop_assert_eq!(t.num_items(), occupied);
                for id in 0..t.max() {
                    if let Some(d) = t.lookup(id) {
                        prop_assert_eq!(d.flow_id, id);
                    }
                }
            }
        }

        /// P2: the shrink rule only ever halves `max`, and only when
        /// `count <= max/3 && max >= 2*MIN`; growth on insert always leaves
        /// `max >= flow_id + 1`.
        #[test]
        fn p2_shrink_and_grow_thresholds_hold(
            ops in prop::collection::vec((any::<bool>(), 0u16..64), 0..40)
        ) {
            let mut t = FlowTable::alloc(MIN_TABLE_SIZE).unwrap();
            for (insert, flow_id) in ops {
                let prev_max = t.max();
                t = if insert {
                    t.insert(descriptor(flow_id)).unwrap()
                } else {
                    t.delete(flow_id)
                };
                if insert {
                    prop_assert!(t.max() >= flow_id + 1);
                    if flow_id < prev_max {
                        prop_assert_eq!(t.max(), prev_max);
                    }
                } else if t.max() != prev_max {
                    prop_assert_eq!(t.max(), prev_max / 2);
                    prop_assert!(prev_max >= MIN_TABLE_SIZE * 2);
                    prop_assert!(t.num_items() <= prev_max / 3);
                }
                prop_assert!(t.max() >= MIN_TABLE_SIZE);
            }
        }
    }
}
