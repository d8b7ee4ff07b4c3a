//! Clock / timer abstraction (component C1).
//!
//! Spec §1 treats the actual timestamping hardware and the device transmit
//! primitive as external collaborators abstracted behind trait-like
//! interfaces; this module is that boundary. `slopos_lib::clock` is the
//! direct precedent — a thin public wrapper (`monotonic_ns`) over a
//! pluggable backend (`kernel_services::platform`) — except there the
//! backend is a module of raw hardware reads and here it's a trait object,
//! since this crate has no platform to wrap.
//!
//! [`SimClock`]/[`ManualTimer`] are always available (no_std + alloc) and
//! are what the scenario tests in spec §8 drive by hand. [`WallClock`]/
//! [`ThreadTimer`] are a real, host-thread-backed implementation gated
//! behind the `std` feature for callers that want to actually run the
//! scheduler instead of single-stepping it in tests.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::ttlock::TtMutex;

/// A monotonic nanosecond clock. `deadline_ns` passed to [`TimerDriver`]
/// uses the same epoch as [`Clock::now_ns`].
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Callback invoked by a [`TimerDriver`] when an armed deadline elapses.
pub trait TimerSink: Send + Sync {
    fn on_fire(&self);
}

/// An armable one-shot timer (spec §4.1: `Timer::arm_absolute`,
/// `Timer::cancel`; spec §4.7 step 4: `Timer::forward_now`).
pub trait TimerDriver: Send + Sync {
    /// Arm to fire once at `deadline_ns`, invoking `sink.on_fire()`.
    /// Replaces any previously armed deadline.
    fn arm_absolute(&self, deadline_ns: u64, sink: Arc<dyn TimerSink>);

    /// Reschedule the currently armed timer to fire `wait_ns` from now,
    /// reusing the sink passed to the last `arm_absolute`. Intended to be
    /// called from within that sink's `on_fire`, mirroring the reference
    /// `hrtimer_forward_now` used by the send loop to rearm itself.
    fn forward_now(&self, wait_ns: u64);

    /// Cancel any pending timer. Idempotent. Blocks until no invocation of
    /// the sink is in flight (spec §5: "`cancel()` blocks the caller until
    /// no handler invocation is pending"). Returns whether a timer had been
    /// armed.
    fn cancel(&self) -> bool;
}

// =============================================================================
// SimClock / ManualTimer — deterministic test doubles
// =============================================================================

/// A clock whose reading is set explicitly by the test driving it.
pub struct SimClock {
    now_ns: AtomicU64,
}

impl SimClock {
    pub const fn new(start_ns: u64) -> Self {
        Self {
            now_ns: AtomicU64::new(start_ns),
        }
    }

    pub fn set(&self, ns: u64) {
        self.now_ns.store(ns, Ordering::Release);
    }

    pub fn advance(&self, delta_ns: u64) {
        self.now_ns.fetch_add(delta_ns, Ordering::AcqRel);
    }
}

impl Clock for SimClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }
}

struct ManualTimerState {
    deadline_ns: Option<u64>,
    sink: Option<Arc<dyn TimerSink>>,
}

/// A timer that only fires when the test explicitly calls [`ManualTimer::fire`].
pub struct ManualTimer {
    clock: Arc<dyn Clock>,
    state: TtMutex<ManualTimerState>,
}

impl ManualTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: TtMutex::new(ManualTimerState {
                deadline_ns: None,
                sink: None,
            }),
        }
    }

    /// The deadline currently armed, if any.
    pub fn armed_deadline(&self) -> Option<u64> {
        self.state.lock().deadline_ns
    }

    /// Invoke the armed sink's `on_fire` as if the deadline had elapsed,
    /// regardless of the clock's current reading. No-op if nothing is armed.
    pub fn fire(&self) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.on_fire();
        }
    }
}

impl TimerDriver for ManualTimer {
    fn arm_absolute(&self, deadline_ns: u64, sink: Arc<dyn TimerSink>) {
        let mut state = self.state.lock();
        state.deadline_ns = Some(deadline_ns);
        state.sink = Some(sink);
    }

    fn forward_now(&self, wait_ns: u64) {
        let now = self.clock.now_ns();
        let mut state = self.state.lock();
        if state.sink.is_some() {
            state.deadline_ns = Some(now + wait_ns);
        }
    }

    fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        let was_armed = state.sink.is_some();
        state.deadline_ns = None;
        state.sink = None;
        was_armed
    }
}

// =============================================================================
// WallClock / ThreadTimer — real, host-thread-backed implementation
// =============================================================================

#[cfg(feature = "std")]
mod threaded {
    extern crate std;

    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{Clock, TimerDriver, TimerSink};
    use crate::ttlock::TtMutex;

    /// A real monotonic clock backed by [`std::time::Instant`].
    pub struct WallClock {
        start: Instant,
    }

    impl WallClock {
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
            }
        }
    }

    impl Default for WallClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for WallClock {
        fn now_ns(&self) -> u64 {
            self.start.elapsed().as_nanos() as u64
        }
    }

    /// Longest single sleep the background thread takes before re-checking
    /// whether it has been cancelled or rearmed — keeps cancellation latency
    /// bounded without busy-looping the sleeper itself.
    const SLEEP_QUANTUM: Duration = Duration::from_millis(5);

    struct Shared {
        clock: Arc<dyn Clock>,
        generation: AtomicU64,
        armed: TtMutex<Option<Arc<dyn TimerSink>>>,
        firing: AtomicBool,
    }

    /// A one-shot timer backed by a detached host thread that sleeps until
    /// the deadline, then invokes the sink. The busy-wait precision window
    /// (spec §4.7 step 7) happens inside the sink's own `on_fire`, not here —
    /// this driver only needs to be accurate to about [`SLEEP_QUANTUM`].
    pub struct ThreadTimer {
        shared: Arc<Shared>,
    }

    impl ThreadTimer {
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self {
                shared: Arc::new(Shared {
                    clock,
                    generation: AtomicU64::new(0),
                    armed: TtMutex::new(None),
                    firing: AtomicBool::new(false),
                }),
            }
        }

        fn spawn(&self, deadline_ns: u64, generation: u64) {
            let shared = Arc::clone(&self.shared);
            thread::spawn(move || {
                loop {
                    if shared.generation.load(Ordering::Acquire) != generation {
                        return;
                    }
                    let now = shared.clock.now_ns();
                    if now >= deadline_ns {
                        break;
                    }
                    let remaining = Duration::from_nanos(deadline_ns - now);
                    thread::sleep(remaining.min(SLEEP_QUANTUM));
                }
                shared.fire_if_current(generation);
            });
        }
    }

    impl TimerDriver for ThreadTimer {
        fn arm_absolute(&self, deadline_ns: u64, sink: Arc<dyn TimerSink>) {
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            *self.shared.armed.lock() = Some(sink);
            self.spawn(deadline_ns, generation);
        }

        fn forward_now(&self, wait_ns: u64) {
            let now = self.shared.clock.now_ns();
            let generation = self.shared.generation.load(Ordering::Acquire);
            if self.shared.armed.lock().is_some() {
                self.spawn(now + wait_ns, generation);
            }
        }

        fn cancel(&self) -> bool {
            let was_armed = self.shared.armed.lock().take().is_some();
            self.shared.generation.fetch_add(1, Ordering::AcqRel);
            while self.shared.firing.load(Ordering::Acquire) {
                thread::yield_now();
            }
            was_armed
        }
    }

    // Dispatch happens on the spawned thread: once its sleep loop above
    // breaks (deadline reached, generation still current), it hands off to
    // `fire_if_current` before invoking the sink, so `cancel()` can observe
    // `firing` going high for the duration of the callback.
    impl Shared {
        fn fire_if_current(self: &Arc<Self>, generation: u64) {
            if self.generation.load(Ordering::Acquire) != generation {
                return;
            }
            let sink = self.armed.lock().clone();
            let Some(sink) = sink else { return };
            self.firing.store(true, Ordering::Release);
            sink.on_fire();
            self.firing.store(false, Ordering::Release);
        }
    }
}

#[cfg(feature = "std")]
pub use threaded::{ThreadTimer, WallClock};
