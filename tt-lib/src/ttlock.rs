//! Fair ticket-lock mutex.
//!
//! Generalizes `slopos-lib`'s `IrqMutex` for a portable (non-kernel) library:
//! the ticket/now-serving pair and the acquire spin loop are the same, but
//! there is no IRQ context to disable and no preemption counter to bump —
//! this runs under ordinary OS threads, so the only thing worth preserving
//! from the kernel version is the fairness property itself.
//!
//! Used for the per-port control mutex (spec §5: "mutation is serialised
//! through a per-port control mutex").

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU16, Ordering};

/// Ticket-lock mutex. FIFO-fair: callers acquire in the order they called
/// `lock()`, which avoids starvation under contention on the control path.
pub struct TtMutex<T> {
    next_ticket: AtomicU16,
    now_serving: AtomicU16,
    data: UnsafeCell<T>,
}

// SAFETY: exclusive access is granted through ticket acquisition; `T: Send`
// is sufficient because only one thread ever holds a guard at a time.
unsafe impl<T: Send> Send for TtMutex<T> {}
unsafe impl<T: Send> Sync for TtMutex<T> {}

pub struct TtMutexGuard<'a, T> {
    mutex: &'a TtMutex<T>,
}

impl<T> TtMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicU16::new(0),
            now_serving: AtomicU16::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning until it is our turn.
    #[inline]
    pub fn lock(&self) -> TtMutexGuard<'_, T> {
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        loop {
            let serving = self.now_serving.load(Ordering::Acquire);
            if serving == my_ticket {
                break;
            }
            let distance = my_ticket.wrapping_sub(serving) as u32;
            for _ in 0..distance.min(64) {
                spin_loop();
            }
        }
        TtMutexGuard { mutex: self }
    }

    /// Acquire only if the lock is currently free; never waits.
    #[inline]
    pub fn try_lock(&self) -> Option<TtMutexGuard<'_, T>> {
        let current = self.now_serving.load(Ordering::Relaxed);
        if self
            .next_ticket
            .compare_exchange(
                current,
                current.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            Some(TtMutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// `true` if some thread currently holds the lock (racy, diagnostic only).
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.now_serving.load(Ordering::Relaxed)
    }
}

impl<T> Deref for TtMutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for TtMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for TtMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.now_serving.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_mutation() {
        let m = TtMutex::new(0u32);
        *m.lock() += 1;
        *m.lock() += 1;
        assert_eq!(*m.lock(), 2);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = TtMutex::new(0u32);
        let guard = m.lock();
        assert!(m.try_lock().is_none());
        drop(guard);
        assert!(m.try_lock().is_some());
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        let m = Arc::new(TtMutex::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *m.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 8000);
    }
}
