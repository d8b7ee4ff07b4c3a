//! The Time-Triggered datapath core: flow table, planner, send cache, and
//! port scheduler (components C4–C8).
//!
//! Builds on [`tt_codec`] for framing and [`tt_lib`] for the ambient mutex /
//! clock / logging layer. See `DESIGN.md` at the workspace root for how each
//! module is grounded in the reference implementation.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod control;
pub mod error;
pub mod packet_buffer;
pub mod planner;
pub mod scheduler;
pub mod send_cache;
pub mod table;

pub use control::{ControlRecord, Direction};
pub use error::TtError;
pub use packet_buffer::PacketBuffer;
pub use scheduler::{DeviceSend, PortConfig, PortScheduler, SchedulerState, SendAction};
pub use send_cache::{NextDue, SendCache};
pub use table::{FlowDescriptor, FlowTable, MIN_TABLE_SIZE};
