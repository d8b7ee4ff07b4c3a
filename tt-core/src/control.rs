//! Control-plane record (spec §6, §3.1 of the expanded design).
//!
//! Mirrors `onf_tt_flow_mod` field-for-field (`include/openflow/onf-tt-ext.h`):
//! the struct this module defines is what the enclosing datapath hands the
//! core after it has already parsed the OpenFlow experimenter message —
//! wire parsing itself stays out of scope (spec §1).

use crate::table::FlowDescriptor;

/// Which table a [`ControlRecord`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Arrive,
}

/// A controller-delivered flow entry, matching `onf_tt_flow_mod`'s fields.
///
/// `execute_time_ns` is accepted and stored here for forward compatibility
/// but is not retained on the resulting [`FlowDescriptor`] — Open Question
/// (c) in the design notes leaves its semantics (a deferred-activation
/// epoch?) unimplemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRecord {
    pub table_id: u16,
    pub port: u32,
    pub direction: Direction,
    pub flow_id: u16,
    pub period_ns: u64,
    pub offset_ns: u64,
    pub buffer_id: u32,
    pub packet_size: u32,
    pub execute_time_ns: u64,
}

impl ControlRecord {
    /// Project the scheduling-relevant fields into a [`FlowDescriptor`].
    pub fn to_descriptor(&self) -> FlowDescriptor {
        FlowDescriptor {
            flow_id: self.flow_id,
            buffer_id: self.buffer_id,
            period: self.period_ns,
            offset: self.offset_ns,
            length: self.packet_size,
        }
    }
}
