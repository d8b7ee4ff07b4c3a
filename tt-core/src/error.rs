//! Error taxonomy (spec §7). Grounded on `drivers/src/net/types.rs`'s
//! `NetError` — a hand-rolled enum with a manual `Display`, no `thiserror`;
//! the datapath core keeps the same texture rather than pulling in a derive
//! macro for eight variants.

use core::fmt;

/// Errors returned by flow table, planner, and scheduler operations.
///
/// `MissedDeadline` and `Collision` are never returned from a `Result` — they
/// are diagnostic-only, logged at a rate-limited level and otherwise
/// swallowed (spec §7) — but are kept as variants so call sites that report
/// them share one vocabulary with everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtError {
    /// Bad argument: flow id at or past `MAX_FLOW_ID`, zero period, etc.
    Invalid,
    /// An allocation (table growth, planner arrays) failed.
    OutOfMemory,
    /// The frame could not be made uniquely writable.
    NotWritable,
    /// Mutation attempted while the port scheduler is `Running`.
    Busy,
    /// Lookup or delete against an empty slot.
    NotFound,
    /// Diagnostic only: the send loop fired after its target time.
    MissedDeadline,
    /// Diagnostic only: two flows share a send tick.
    Collision,
}

impl fmt::Display for TtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Invalid => "invalid argument",
            Self::OutOfMemory => "out of memory",
            Self::NotWritable => "frame not writable",
            Self::Busy => "scheduler is running",
            Self::NotFound => "entry not found",
            Self::MissedDeadline => "missed send deadline",
            Self::Collision => "send tick collision",
        };
        write!(f, "{msg}")
    }
}

impl From<tt_codec::TtCodecError> for TtError {
    fn from(err: tt_codec::TtCodecError) -> Self {
        match err {
            tt_codec::TtCodecError::OutOfMemory => Self::OutOfMemory,
            tt_codec::TtCodecError::NotWritable => Self::NotWritable,
            tt_codec::TtCodecError::Invalid => Self::Invalid,
        }
    }
}
