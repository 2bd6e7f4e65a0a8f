//! Session statistics: relaxed atomic counters shared between the ingest
//! loop, the jitter buffer, and the application.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionStats {
    pub received: AtomicU64,
    pub lost: AtomicU64,
    pub duplicates: AtomicU64,
    pub reordered: AtomicU64,
    pub state_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    pub late_drops: AtomicU64,
    pub timeline_shifts: AtomicU64,
    pub word_space_resets: AtomicU64,
    pub watchdog_trips: AtomicU64,
    pub transmissions: AtomicU64,
}

impl SessionStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            reordered: self.reordered.load(Ordering::Relaxed),
            state_errors: self.state_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            late_drops: self.late_drops.load(Ordering::Relaxed),
            timeline_shifts: self.timeline_shifts.load(Ordering::Relaxed),
            word_space_resets: self.word_space_resets.load(Ordering::Relaxed),
            watchdog_trips: self.watchdog_trips.load(Ordering::Relaxed),
            transmissions: self.transmissions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the cumulative session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub lost: u64,
    pub duplicates: u64,
    pub reordered: u64,
    pub state_errors: u64,
    pub decode_errors: u64,
    pub late_drops: u64,
    pub timeline_shifts: u64,
    pub word_space_resets: u64,
    pub watchdog_trips: u64,
    pub transmissions: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx={} lost={} dup={} reord={} state_err={} decode_err={} late={} shifts={} word_resets={}",
            self.received,
            self.lost,
            self.duplicates,
            self.reordered,
            self.state_errors,
            self.decode_errors,
            self.late_drops,
            self.timeline_shifts,
            self.word_space_resets,
        )
    }
}
