//! Frame buffer and TT framing codec (components C2 and C3).
//!
//! `classify_ingress` / `trdp_to_tt` / `tt_to_trdp` are a direct generalisation
//! of `is_tt_packet` / `is_trdp_packet` / `push_tt` / `pop_tt`: same shim
//! layout and the same "shift the MAC header, rewrite the EtherType" move,
//! done over an owned [`Frame`] instead of a kernel `sk_buff`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod codec;
pub mod frame;

pub use codec::{Classification, ETH_P_TT, TT_HLEN, TT_UDP_PORT, classify_ingress, tt_to_trdp, trdp_to_tt};
pub use frame::Frame;

/// Errors raised by frame and codec operations (spec §4.2/§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtCodecError {
    /// Headroom growth required an allocation that failed.
    OutOfMemory,
    /// The frame could not be made uniquely owned for an in-place edit.
    NotWritable,
    /// Malformed input: a requested pull exceeds the active region, or a
    /// classified-TRDP frame turns out not to carry a usable header.
    Invalid,
}

impl core::fmt::Display for TtCodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NotWritable => write!(f, "frame not writable"),
            Self::Invalid => write!(f, "invalid frame"),
        }
    }
}
