//! Bounded concurrency gates.
//!
//! A [`Gate`] is a counting semaphore: a holder count behind a mutex, and
//! a condition variable that wakes waiters when a permit drops. Its cost
//! does not depend on the capacity, so a gate sized from a huge descriptor
//! limit is as cheap as a small one. It only limits how many holders exist
//! at once and makes no promise about admission order.

use std::fmt;
use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub struct Gate {
    held: Mutex<usize>,
    released: Condvar,
    capacity: usize,
}

impl Gate {
    /// A gate admitting at most `capacity` holders (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            held: Mutex::new(0),
            released: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn held(&self) -> MutexGuard<'_, usize> {
        // The count is only ever changed by whole increments, so a poisoned
        // guard still holds a consistent value.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until admitted. The slot is released when the permit drops.
    pub fn start(&self) -> GatePermit<'_> {
        let mut held = self.held();
        while *held >= self.capacity {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held += 1;
        GatePermit { gate: self }
    }

    /// Admit without blocking, or `None` if the gate is full.
    pub fn try_start(&self) -> Option<GatePermit<'_>> {
        let mut held = self.held();
        if *held >= self.capacity {
            return None;
        }
        *held += 1;
        Some(GatePermit { gate: self })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held.
    pub fn in_flight(&self) -> usize {
        *self.held()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Proof of admission to a [`Gate`].
#[must_use = "the gate slot is released as soon as the permit is dropped"]
pub struct GatePermit<'a> {
    gate: &'a Gate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let mut held = self.gate.held();
        *held = held.saturating_sub(1);
        drop(held);
        self.gate.released.notify_one();
    }
}

impl fmt::Debug for GatePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePermit").finish_non_exhaustive()
    }
}

/// Soft limit on open file descriptors for this process.
///
/// `None` when the platform gives no usable answer (non-unix, or an
/// infinite limit).
pub fn descriptor_limit() -> io::Result<Option<u64>> {
    #[cfg(unix)]
    {
        let mut rl = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } != 0 {
            return Err(io::Error::last_os_error());
        }
        if rl.rlim_cur == libc::RLIM_INFINITY {
            return Ok(None);
        }
        Ok(Some(rl.rlim_cur as u64))
    }
    #[cfg(not(unix))]
    {
        Ok(None)
    }
}

/// Share of the descriptor limit handed to the temp-file gate.
pub fn tmp_gate_capacity(limit: u64, percent: u8) -> usize {
    let share = limit.saturating_mul(u64::from(percent)) / 100;
    usize::try_from(share).unwrap_or(usize::MAX).max(1)
}
