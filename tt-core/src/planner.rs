//! Planner / dispatch (component C5): macro-period, offset materialisation,
//! sort, collision detection.
//!
//! Ported from `dispatch()` (`original_source/datapath/tt.c`): same LCM
//! accumulation over live descriptors, same "emit `offset + j*period` for
//! every `j` until the macro-period boundary" materialisation, same
//! adjacent-pair collision scan after sorting. The reference's recursive
//! median-of-three quicksort is replaced with `slice::sort_unstable_by_key`
//! — spec §4.5 step 4 allows any O(N log N) algorithm, and §9 calls out that
//! a non-recursive sort is preferable to avoid deep stacks at large N.

extern crate alloc;

use alloc::vec::Vec;
use log::info;

use tt_lib::log_ext::RateLimiter;
use tt_lib::warn_ratelimited;

use crate::error::TtError;
use crate::send_cache::SendCache;
use crate::table::FlowTable;

/// Upper bound on the number of planner log lines for repeated collisions;
/// one collision event still reports every colliding pair, but a pathological
/// table won't flood the log.
static COLLISION_LOG_LIMITER: RateLimiter = RateLimiter::new(16);

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// Plan a [`SendCache`] from a flow table snapshot. Synchronous; must only be
/// invoked while the owning port is not `Running` (spec §4.5).
///
/// `max_cache_len` bounds the materialised entry count `N`; exceeding it
/// fails with [`TtError::OutOfMemory`] rather than allocating unbounded
/// memory for a pathological period mix.
pub fn plan(table: &FlowTable, max_cache_len: u32) -> Result<SendCache, TtError> {
    let live: Vec<_> = (0..table.max())
        .filter_map(|id| table.lookup(id))
        .collect();

    if live.is_empty() {
        return Ok(SendCache::empty());
    }

    // 1. Macro-period = LCM over all live periods.
    let macro_period = live.iter().fold(1u64, |acc, d| lcm(acc, d.period));

    // 2. N = sum of per-flow occurrence counts within the macro-period.
    let n: u64 = live.iter().map(|d| macro_period / d.period).sum();
    if n > max_cache_len as u64 {
        return Err(TtError::OutOfMemory);
    }
    let n = n as usize;

    // 3. Materialise.
    let mut send_times = Vec::new();
    let mut flow_ids = Vec::new();
    send_times
        .try_reserve_exact(n)
        .map_err(|_| TtError::OutOfMemory)?;
    flow_ids
        .try_reserve_exact(n)
        .map_err(|_| TtError::OutOfMemory)?;
    for d in &live {
        let mut offset = d.offset;
        while offset < macro_period {
            send_times.push(offset);
            flow_ids.push(d.flow_id);
            offset += d.period;
        }
    }

    // 4. Sort ascending by time, carrying flow_ids along.
    let mut order: Vec<usize> = (0..send_times.len()).collect();
    order.sort_unstable_by_key(|&i| send_times[i]);
    let send_times: Vec<u64> = order.iter().map(|&i| send_times[i]).collect();
    let flow_ids: Vec<u16> = order.iter().map(|&i| flow_ids[i]).collect();

    // 5. Collision check: diagnostic only, planning still completes (I6).
    let mut collisions = 0u32;
    for k in 1..send_times.len() {
        if send_times[k] == send_times[k - 1] {
            collisions += 1;
            warn_ratelimited!(
                COLLISION_LOG_LIMITER,
                "tt planner: collision at t={} between flow {} and flow {}",
                send_times[k],
                flow_ids[k - 1],
                flow_ids[k]
            );
        }
    }
    if collisions == 0 {
        info!(
            "tt planner: planned {} entries, macro_period={}ns",
            send_times.len(),
            macro_period
        );
    }

    Ok(SendCache {
        macro_period,
        send_times,
        flow_ids,
    })
}
