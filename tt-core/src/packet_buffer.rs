//! Packet buffer (component C8): per-datapath `flow_id → latest frame`.
//!
//! Shaped like `drivers/src/net/udp.rs`'s `UdpDemuxTable` — a fixed dense
//! array behind a lock, register/lookup by a small integer key — but keyed
//! by `flow_id` and holding at most one frame per key (spec §3: "at most one
//! frame per flow id retained. Overwritten on new arrival").

extern crate alloc;

use alloc::vec::Vec;

use tt_codec::Frame;
use tt_lib::ttlock::TtMutex;

struct Slot {
    frame: Frame,
    arrival_ts: u64,
}

/// `put`/`take` are both O(1); producers (ingress) and the single timer
/// consumer never need cross-slot ordering (spec §5).
pub struct PacketBuffer {
    slots: TtMutex<Vec<Option<Slot>>>,
}

impl PacketBuffer {
    pub fn new(capacity: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || None);
        Self {
            slots: TtMutex::new(slots),
        }
    }

    /// Grow the buffer if `flow_id` is past its current capacity, keeping
    /// existing entries. Called by the flow table's insert path when a flow
    /// id arrives outside the buffer's current range.
    pub fn ensure_capacity(&self, flow_id: u16) {
        let mut slots = self.slots.lock();
        if (flow_id as usize) >= slots.len() {
            slots.resize_with(flow_id as usize + 1, || None);
        }
    }

    /// Store `frame`, overwriting and freeing whatever was previously
    /// buffered for `flow_id`.
    pub fn put(&self, flow_id: u16, frame: Frame, arrival_ts: u64) {
        let mut slots = self.slots.lock();
        if (flow_id as usize) >= slots.len() {
            slots.resize_with(flow_id as usize + 1, || None);
        }
        slots[flow_id as usize] = Some(Slot { frame, arrival_ts });
    }

    /// Atomically clear and return the slot for `flow_id`.
    pub fn take(&self, flow_id: u16) -> Option<(Frame, u64)> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(flow_id as usize)?.take()?;
        Some((slot.frame, slot.arrival_ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_bytes(b"hello", 16, 14)
    }

    #[test]
    fn put_then_take_round_trips() {
        let buf = PacketBuffer::new(8);
        buf.put(3, frame(), 1_000);
        let (f, ts) = buf.take(3).unwrap();
        assert_eq!(f.payload(), b"hello");
        assert_eq!(ts, 1_000);
        assert!(buf.take(3).is_none());
    }

    #[test]
    fn put_overwrites_previous_frame() {
        let buf = PacketBuffer::new(8);
        buf.put(1, Frame::from_bytes(b"first", 16, 14), 0);
        buf.put(1, Frame::from_bytes(b"second", 16, 14), 5);
        let (f, ts) = buf.take(1).unwrap();
        assert_eq!(f.payload(), b"second");
        assert_eq!(ts, 5);
    }

    #[test]
    fn grows_to_fit_flow_ids_past_initial_capacity() {
        let buf = PacketBuffer::new(2);
        buf.put(10, frame(), 0);
        assert!(buf.take(10).is_some());
    }
}
