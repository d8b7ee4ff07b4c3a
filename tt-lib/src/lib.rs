//! Ambient utilities shared by the TT datapath crates.
//!
//! Mirrors the role `slopos-lib` plays for the SlopOS kernel — a small,
//! dependency-light layer underneath the networking code — but scoped to
//! what a portable (non-kernel) library actually needs: a fair mutex, a
//! logging facade, an epoch-based reclamation guard, and the clock/timer
//! traits the datapath core schedules against.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod clock;
pub mod epoch;
pub mod log_ext;
pub mod ttlock;

pub use clock::{Clock, TimerDriver, TimerSink};
pub use epoch::EpochGuard;
pub use ttlock::{TtMutex, TtMutexGuard};
