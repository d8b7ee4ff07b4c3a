//! Port scheduler (component C7): per-port state machine, timer arm/cancel,
//! and the high-resolution send loop.
//!
//! Ported from `ovs_vport_hrtimer_start`/`hrtimer_handler`/
//! `ovs_vport_hrtimer_cancel` (`original_source/datapath/vport.c`): the same
//! "arm at the next macro-period boundary minus `advance_time`", the same
//! "forward_now, then spin the last `advance_time` window" handler shape,
//! and the same cooperative-flag cancellation. Mutation is serialised
//! through [`tt_lib::ttlock::TtMutex`], following `drivers/src/net/
//! neighbor.rs`'s "collect actions under the lock, dispatch outside it"
//! convention — here the "action" is the single frame handed to the
//! injected [`DeviceSend`] once the control lock has been released, mirroring
//! `hrtimer_handler`'s tail call into `ovs_vport_send(vport, out_skb)`.

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info};

use tt_codec::Frame;
use tt_lib::clock::{Clock, TimerDriver, TimerSink};
use tt_lib::log_ext::RateLimiter;
use tt_lib::ttlock::TtMutex;
use tt_lib::warn_ratelimited;

use crate::control::{ControlRecord, Direction};
use crate::error::TtError;
use crate::packet_buffer::PacketBuffer;
use crate::planner;
use crate::send_cache::SendCache;
use crate::table::{FlowDescriptor, FlowTable, PublishedTable, MIN_TABLE_SIZE};

/// Default busy-wait horizon before a scheduled send boundary (spec §4.7).
pub const DEFAULT_ADVANCE_TIME_NS: u64 = 40_000;

/// Per-port tunables (spec §4.10, ambient configuration — no file/env/CLI
/// surface; constructed directly by the embedding datapath).
#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
    pub port: u32,
    pub advance_time_ns: u64,
    pub min_table_size: u16,
    pub max_flow_id: u16,
    pub max_cache_len: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port: 0,
            advance_time_ns: DEFAULT_ADVANCE_TIME_NS,
            min_table_size: MIN_TABLE_SIZE,
            max_flow_id: u16::MAX - 1,
            max_cache_len: 1 << 20,
        }
    }
}

/// Device transmit primitive (spec §1 external collaborator: "device
/// transmit primitives... abstracted as trait-like interfaces"). Implemented
/// by the embedding datapath; `on_fire` calls this outside the control lock
/// once a frame has survived the missed-deadline and staleness checks,
/// mirroring `hrtimer_handler`'s tail call into `ovs_vport_send`.
pub trait DeviceSend: Send + Sync {
    fn send_frame(&self, port: u32, flow_id: u16, frame: Frame);
}

/// Lifecycle state (spec §3: `Idle → TableMutating → Planned → Running →
/// Cancelling → Idle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    TableMutating,
    Planned,
    Running,
    Cancelling,
}

/// A frame ready to hand to the enclosing datapath's device transmit
/// primitive; `timer_handler` returns this to its caller instead of calling
/// `send_frame` itself, keeping device I/O outside the control lock.
pub struct SendAction {
    pub flow_id: u16,
    pub frame: Frame,
}

struct Inner {
    state: SchedulerState,
    send_table: PublishedTable,
    arrive_table: PublishedTable,
    send_cache: Option<SendCache>,
}

static MISSED_DEADLINE_LIMITER: RateLimiter = RateLimiter::new(64);
static STALE_FRAME_LIMITER: RateLimiter = RateLimiter::new(64);

/// Per-egress-port scheduler. Owns its two flow tables, its send cache, and
/// drives the timer.
pub struct PortScheduler<C, T, D> {
    config: PortConfig,
    clock: Arc<C>,
    timer: Arc<T>,
    device: Arc<D>,
    inner: TtMutex<Inner>,
    packets: Arc<PacketBuffer>,
    timer_armed: AtomicBool,
}

impl<C, T, D> PortScheduler<C, T, D>
where
    C: Clock + 'static,
    T: TimerDriver + 'static,
    D: DeviceSend + 'static,
{
    pub fn new(
        config: PortConfig,
        clock: Arc<C>,
        timer: Arc<T>,
        device: Arc<D>,
        packets: Arc<PacketBuffer>,
    ) -> Result<Self, TtError> {
        Ok(Self {
            config,
            clock,
            timer,
            device,
            inner: TtMutex::new(Inner {
                state: SchedulerState::Idle,
                send_table: PublishedTable::new(FlowTable::alloc(config.min_table_size)?),
                arrive_table: PublishedTable::new(FlowTable::alloc(config.min_table_size)?),
                send_cache: None,
            }),
            packets,
            timer_armed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    fn validate_flow_id(&self, flow_id: u16) -> Result<(), TtError> {
        if flow_id >= self.config.max_flow_id {
            return Err(TtError::Invalid);
        }
        Ok(())
    }

    fn reject_if_running(&self, state: SchedulerState) -> Result<(), TtError> {
        if state == SchedulerState::Running {
            return Err(TtError::Busy);
        }
        Ok(())
    }

    // =========================================================================
    // Entry mutation (spec §6 command surface)
    // =========================================================================

    /// Apply a controller-delivered record (spec §6), routing by
    /// [`Direction`] to the matching table's modify command.
    pub fn apply_record(&self, record: ControlRecord) -> Result<(), TtError> {
        match record.direction {
            Direction::Send => self.modify_send_entry(record.to_descriptor()),
            Direction::Arrive => self.modify_arrive_entry(record.to_descriptor()),
        }
    }

    pub fn modify_send_entry(&self, descriptor: FlowDescriptor) -> Result<(), TtError> {
        self.validate_flow_id(descriptor.flow_id)?;
        if descriptor.period == 0 || descriptor.offset >= descriptor.period {
            return Err(TtError::Invalid);
        }
        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;
        inner.state = SchedulerState::TableMutating;
        let next = inner.send_table.enter().insert(descriptor)?;
        inner.send_table.publish(next);
        inner.state = SchedulerState::Idle;
        debug!("tt scheduler: modified send entry flow_id={}", descriptor.flow_id);
        Ok(())
    }

    pub fn modify_arrive_entry(&self, descriptor: FlowDescriptor) -> Result<(), TtError> {
        self.validate_flow_id(descriptor.flow_id)?;
        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;
        inner.state = SchedulerState::TableMutating;
        let next = inner.arrive_table.enter().insert(descriptor)?;
        inner.arrive_table.publish(next);
        inner.state = SchedulerState::Idle;
        Ok(())
    }

    pub fn delete_send_entry(&self, flow_id: u16) -> Result<(), TtError> {
        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;
        if inner.send_table.enter().lookup(flow_id).is_none() {
            return Err(TtError::NotFound);
        }
        inner.state = SchedulerState::TableMutating;
        let next = inner.send_table.enter().delete(flow_id);
        inner.send_table.publish(next);
        inner.state = SchedulerState::Idle;
        Ok(())
    }

    pub fn delete_arrive_entry(&self, flow_id: u16) -> Result<(), TtError> {
        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;
        if inner.arrive_table.enter().lookup(flow_id).is_none() {
            return Err(TtError::NotFound);
        }
        inner.state = SchedulerState::TableMutating;
        let next = inner.arrive_table.enter().delete(flow_id);
        inner.arrive_table.publish(next);
        inner.state = SchedulerState::Idle;
        Ok(())
    }

    pub fn delete_send_table(&self) -> Result<(), TtError> {
        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;
        inner.send_table.publish(FlowTable::alloc(self.config.min_table_size)?);
        inner.send_cache = None;
        Ok(())
    }

    pub fn delete_arrive_table(&self) -> Result<(), TtError> {
        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;
        inner.arrive_table.publish(FlowTable::alloc(self.config.min_table_size)?);
        Ok(())
    }

    pub fn lookup_send_entry(&self, flow_id: u16) -> Option<FlowDescriptor> {
        self.inner.lock().send_table.enter().lookup(flow_id).copied()
    }

    /// Informational only (Open Question (b)): nothing on the send path
    /// consults this table; a future admission-control layer would.
    pub fn lookup_arrive_entry(&self, flow_id: u16) -> Option<FlowDescriptor> {
        self.inner.lock().arrive_table.enter().lookup(flow_id).copied()
    }

    // =========================================================================
    // Lifecycle (spec §4.7)
    // =========================================================================

    /// `start()`: cancel any timer, plan, and arm at the first boundary of a
    /// fresh macro-period minus `advance_time`.
    pub fn start(self: &Arc<Self>) -> Result<(), TtError> {
        self.cancel_timer();

        let mut inner = self.inner.lock();
        self.reject_if_running(inner.state)?;

        let snapshot = inner.send_table.enter();
        let cache = planner::plan(&snapshot, self.config.max_cache_len)?;
        drop(snapshot);

        let now = self.clock.now_ns();
        let offset = cache.macro_period() - now % cache.macro_period();
        let deadline = now + offset.saturating_sub(self.config.advance_time_ns);

        inner.send_cache = Some(cache);
        inner.state = SchedulerState::Planned;
        drop(inner);

        self.timer_armed.store(true, Ordering::Release);
        let sink: Arc<dyn TimerSink> = self.clone();
        self.timer.arm_absolute(deadline, sink);
        self.inner.lock().state = SchedulerState::Running;
        info!("tt scheduler: started, first boundary in {offset}ns");
        Ok(())
    }

    /// `finish()`: clear the armed flag, then loop on `Timer::cancel()` until
    /// no handler invocation remains in flight.
    pub fn finish(&self) {
        self.cancel_timer();
        let mut inner = self.inner.lock();
        if inner.state != SchedulerState::Idle {
            inner.state = SchedulerState::Idle;
        }
    }

    fn cancel_timer(&self) {
        if self.timer_armed.swap(false, Ordering::AcqRel) {
            self.inner.lock().state = SchedulerState::Cancelling;
        }
        // `TimerDriver::cancel` itself blocks until no handler invocation is
        // in flight (spec §5); the caller of `finish()` blocks here too.
        self.timer.cancel();
    }

    /// The core of `timer_handler()` (spec §4.7 steps 1-8), factored out so
    /// it can be unit-tested without going through a real [`TimerSink`]
    /// callback. Returns the frame to transmit, if any survived staleness
    /// and missed-deadline checks.
    fn run_tick(&self) -> Option<SendAction> {
        let now = self.clock.now_ns();

        let (wait_ns, flow_id, absolute_send_ns, macro_period) = {
            let inner = self.inner.lock();
            let cache = inner.send_cache.as_ref()?;
            let due = cache.next_due(now)?;
            (due.wait_ns, due.flow_id, due.absolute_send_ns, cache.macro_period())
        };

        // Step 3: two flows on the exact same tick — push the rearm past the
        // current twin so the next call still reports the correct flow_id.
        let wait_ns = if wait_ns == 0 {
            absolute_send_ns.saturating_sub(now) + self.config.advance_time_ns
        } else {
            wait_ns
        };

        // Step 4: rearm before doing any of the blocking work below.
        self.timer.forward_now(wait_ns);

        // Step 5.
        let buffered = self.packets.take(flow_id);

        // Step 6.
        if absolute_send_ns < now {
            warn_ratelimited!(
                MISSED_DEADLINE_LIMITER,
                "tt scheduler: missed deadline for flow {flow_id} at {now}ns"
            );
            return None;
        }

        // Step 7: spin through the precision window.
        let mut now = now;
        while absolute_send_ns > now && absolute_send_ns - now > self.config.advance_time_ns {
            now = self.clock.now_ns();
            core::hint::spin_loop();
        }

        // Step 8: drop frames retained for a full macro-period or more.
        let (frame, arrival_ts) = buffered?;
        if now.saturating_sub(arrival_ts) >= macro_period {
            if STALE_FRAME_LIMITER.poll().is_some() {
                debug!("tt scheduler: dropping stale frame for flow {flow_id}");
            }
            return None;
        }

        Some(SendAction {
            flow_id,
            frame: frame.clone_for_tx(),
        })
    }
}

impl<C, T, D> TimerSink for PortScheduler<C, T, D>
where
    C: Clock + 'static,
    T: TimerDriver + 'static,
    D: DeviceSend + 'static,
{
    fn on_fire(&self) {
        if !self.timer_armed.load(Ordering::Acquire) {
            return;
        }
        if let Some(action) = self.run_tick() {
            self.device.send_frame(self.config.port, action.flow_id, action.frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use tt_lib::clock::{ManualTimer, SimClock};

    /// Records every frame handed to it, for assertions that `on_fire`
    /// actually reaches the device-send seam instead of discarding the frame.
    struct RecordingDevice {
        sent: TtMutex<Vec<(u32, u16, Vec<u8>)>>,
    }

    impl RecordingDevice {
        fn new() -> Self {
            Self { sent: TtMutex::new(Vec::new()) }
        }
    }

    impl DeviceSend for RecordingDevice {
        fn send_frame(&self, port: u32, flow_id: u16, frame: Frame) {
            self.sent.lock().push((port, flow_id, frame.payload().to_vec()));
        }
    }

    fn scheduler() -> (
        Arc<PortScheduler<SimClock, ManualTimer, RecordingDevice>>,
        Arc<SimClock>,
        Arc<RecordingDevice>,
    ) {
        let clock = Arc::new(SimClock::new(0));
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let timer = Arc::new(ManualTimer::new(clock_dyn));
        let device = Arc::new(RecordingDevice::new());
        let packets = Arc::new(PacketBuffer::new(16));
        let s = Arc::new(
            PortScheduler::new(PortConfig::default(), clock.clone(), timer, device.clone(), packets).unwrap(),
        );
        (s, clock, device)
    }

    #[test]
    fn empty_table_start_and_finish_is_a_clean_no_op() {
        let (s, _clock, _device) = scheduler();
        s.start().unwrap();
        assert!(s.is_running());
        s.finish();
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn mutation_while_running_is_rejected_with_busy() {
        let (s, _clock, _device) = scheduler();
        s.start().unwrap();
        let err = s.modify_send_entry(FlowDescriptor {
            flow_id: 1,
            buffer_id: 1,
            period: 1_000,
            offset: 0,
            length: 64,
        });
        assert_eq!(err, Err(TtError::Busy));
        s.finish();
    }

    #[test]
    fn single_flow_tick_produces_the_buffered_frame() {
        let (s, clock, _device) = scheduler();
        s.modify_send_entry(FlowDescriptor {
            flow_id: 3,
            buffer_id: 0,
            period: 1_000_000,
            offset: 200_000,
            length: 64,
        })
        .unwrap();
        s.packets.put(3, Frame::from_bytes(b"payload", 16, 14), 0);
        s.start().unwrap();
        clock.set(200_000);
        let action = s.run_tick().unwrap();
        assert_eq!(action.flow_id, 3);
        assert_eq!(action.frame.payload(), b"payload");
        s.finish();
    }

    #[test]
    fn on_fire_hands_the_due_frame_to_the_injected_device() {
        let (s, clock, device) = scheduler();
        s.modify_send_entry(FlowDescriptor {
            flow_id: 5,
            buffer_id: 0,
            period: 1_000_000,
            offset: 200_000,
            length: 64,
        })
        .unwrap();
        s.packets.put(5, Frame::from_bytes(b"hello", 16, 14), 0);
        s.start().unwrap();
        clock.set(200_000);
        s.on_fire();
        let sent = device.sent.lock();
        assert_eq!(sent.as_slice(), &[(0, 5, b"hello".to_vec())]);
        drop(sent);
        s.finish();
    }

    #[test]
    fn apply_record_routes_by_direction() {
        let (s, _clock, _device) = scheduler();
        let record = ControlRecord {
            table_id: 0,
            port: 0,
            direction: Direction::Send,
            flow_id: 9,
            period_ns: 1_000,
            offset_ns: 0,
            buffer_id: 0,
            packet_size: 64,
            execute_time_ns: 0,
        };
        s.apply_record(record).unwrap();
        assert_eq!(s.lookup_send_entry(9), Some(record.to_descriptor()));
        assert_eq!(s.lookup_arrive_entry(9), None);

        s.apply_record(ControlRecord { direction: Direction::Arrive, ..record }).unwrap();
        assert_eq!(s.lookup_arrive_entry(9), Some(record.to_descriptor()));
    }

    #[test]
    fn modify_send_entry_rejects_offset_past_period() {
        let (s, _clock, _device) = scheduler();
        let err = s.modify_send_entry(FlowDescriptor {
            flow_id: 1,
            buffer_id: 0,
            period: 100,
            offset: 100,
            length: 64,
        });
        assert_eq!(err, Err(TtError::Invalid));
    }

    #[test]
    fn stale_frame_is_dropped_past_one_macro_period() {
        let (s, clock, _device) = scheduler();
        s.modify_send_entry(FlowDescriptor {
            flow_id: 1,
            buffer_id: 0,
            period: 5_000_000,
            offset: 0,
            length: 64,
        })
        .unwrap();
        s.packets.put(1, Frame::from_bytes(b"stale", 16, 14), 0);
        s.start().unwrap();
        clock.set(6_000_000);
        assert!(s.run_tick().is_none());
        s.finish();
    }

    #[test]
    fn finish_allows_a_clean_restart() {
        let (s, clock, _device) = scheduler();
        s.modify_send_entry(FlowDescriptor {
            flow_id: 1,
            buffer_id: 0,
            period: 1_000,
            offset: 0,
            length: 64,
        })
        .unwrap();
        s.start().unwrap();
        s.finish();
        clock.advance(10);
        s.start().unwrap();
        assert!(s.is_running());
        s.finish();
    }
}
