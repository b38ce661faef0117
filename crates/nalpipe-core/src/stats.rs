//! # Session Counters
//!
//! Lock-free counters bumped by the demuxer and drain threads and read by
//! whoever holds the session (periodic logging, final report).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct StreamCounters {
    // Demuxer side
    bytes_read: AtomicU64,
    refills: AtomicU64,
    read_timeouts: AtomicU64,
    units_submitted: AtomicU64,
    bytes_submitted: AtomicU64,
    leading_bytes_discarded: AtomicU64,
    parameter_sets: AtomicU64,
    idr_units: AtomicU64,
    acquire_timeouts: AtomicU64,
    // Drain side
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    format_changes: AtomicU64,
    empty_polls: AtomicU64,
}

/// Point-in-time copy of [`StreamCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub bytes_read: u64,
    pub refills: u64,
    pub read_timeouts: u64,
    pub units_submitted: u64,
    pub bytes_submitted: u64,
    pub leading_bytes_discarded: u64,
    pub parameter_sets: u64,
    pub idr_units: u64,
    pub acquire_timeouts: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub format_changes: u64,
    pub empty_polls: u64,
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, n: usize) {
        bump(&self.bytes_read, n as u64);
        bump(&self.refills, 1);
    }

    pub(crate) fn record_read_timeout(&self) {
        bump(&self.read_timeouts, 1);
    }

    pub(crate) fn record_unit(&self, len: usize, parameter_set: bool, idr: bool) {
        bump(&self.units_submitted, 1);
        bump(&self.bytes_submitted, len as u64);
        if parameter_set {
            bump(&self.parameter_sets, 1);
        }
        if idr {
            bump(&self.idr_units, 1);
        }
    }

    pub(crate) fn record_discarded(&self, n: usize) {
        bump(&self.leading_bytes_discarded, n as u64);
    }

    pub(crate) fn record_acquire_timeout(&self) {
        bump(&self.acquire_timeouts, 1);
    }

    pub(crate) fn record_release(&self, rendered: bool) {
        if rendered {
            bump(&self.frames_rendered, 1);
        } else {
            bump(&self.frames_dropped, 1);
        }
    }

    pub(crate) fn record_format_change(&self) {
        bump(&self.format_changes, 1);
    }

    pub(crate) fn record_empty_poll(&self) {
        bump(&self.empty_polls, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            bytes_read: get(&self.bytes_read),
            refills: get(&self.refills),
            read_timeouts: get(&self.read_timeouts),
            units_submitted: get(&self.units_submitted),
            bytes_submitted: get(&self.bytes_submitted),
            leading_bytes_discarded: get(&self.leading_bytes_discarded),
            parameter_sets: get(&self.parameter_sets),
            idr_units: get(&self.idr_units),
            acquire_timeouts: get(&self.acquire_timeouts),
            frames_rendered: get(&self.frames_rendered),
            frames_dropped: get(&self.frames_dropped),
            format_changes: get(&self.format_changes),
            empty_polls: get(&self.empty_polls),
        }
    }
}
