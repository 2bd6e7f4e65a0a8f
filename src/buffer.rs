//! Adaptive jitter buffer: reconstructs sender timing on the receiver
//! despite network bursting and loss.
//!
//! Events wait in a min-heap keyed by playout time. Two scheduling
//! disciplines: *relative* chains each event a duration behind the previous
//! one; *absolute* anchors every event to its sender timestamp. The playout
//! worker (see `playout`) pops whatever is due.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::event::Event;
use crate::stats::SessionStats;

/// Default buffer-ahead time.
pub const DEFAULT_BUFFER_MS: u64 = 150;

/// Arrival gap treated as an operator pause under the relative discipline.
/// Must stay below the letter space of the slowest supported WPM (720 ms at
/// 5 WPM).
pub const DEFAULT_WORD_SPACE_THRESHOLD_MS: u64 = 200;

/// Nudge applied when a late arrival shifts the relative timeline forward.
const LATE_SHIFT_EPSILON: Duration = Duration::from_millis(5);

/// Latency samples kept for the jitter window.
const LATENCY_WINDOW: usize = 256;

/// How playout times are derived from arriving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Chain: each event plays one encoded duration after its predecessor.
    Relative,
    /// Anchor: each event plays at sender-timestamp + offset, independently.
    Absolute,
}

/// An event scheduled for playout. Owned by the buffer until dispatched.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub playout_at: Instant,
    pub sequence: u8,
    pub key_down: bool,
    pub duration_ms: u16,
    pub callsign: Arc<str>,
}

impl PartialEq for BufferedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.playout_at == other.playout_at && self.sequence == other.sequence
    }
}

impl Eq for BufferedEvent {}

impl PartialOrd for BufferedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BufferedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.playout_at
            .cmp(&other.playout_at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Outcome of scheduling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Scheduled,
    /// Playout time was already further in the past than the late
    /// threshold; the event was discarded.
    LateDropped,
}

/// Advisory sizing recommendation derived from the jitter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAdvice {
    Increase,
    Decrease,
    Keep,
}

/// Observed scheduling latency over the recent window, milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterWindow {
    pub samples: usize,
    pub min_ms: i64,
    pub max_ms: i64,
    pub avg_ms: i64,
}

impl JitterWindow {
    /// Spread between the most- and least-buffered arrival.
    pub fn jitter_ms(&self) -> i64 {
        if self.samples == 0 {
            0
        } else {
            self.max_ms - self.min_ms
        }
    }
}

#[derive(Debug)]
pub struct JitterBuffer {
    discipline: Discipline,
    buffer: Duration,
    word_space_threshold: Duration,
    late_threshold: Duration,
    heap: BinaryHeap<Reverse<BufferedEvent>>,
    /// Relative discipline: playout instant of the previous event.
    last_playout: Option<Instant>,
    /// Absolute discipline: first arrival and its sender timestamp.
    epoch: Option<(Instant, u32)>,
    last_arrival: Option<Instant>,
    latencies: VecDeque<i64>,
    shifts_in_window: u64,
    stats: Arc<SessionStats>,
}

impl JitterBuffer {
    pub fn new(discipline: Discipline, buffer_ms: u64, stats: Arc<SessionStats>) -> Self {
        Self {
            discipline,
            buffer: Duration::from_millis(buffer_ms),
            word_space_threshold: Duration::from_millis(DEFAULT_WORD_SPACE_THRESHOLD_MS),
            late_threshold: late_threshold_for(buffer_ms),
            heap: BinaryHeap::new(),
            last_playout: None,
            epoch: None,
            last_arrival: None,
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            shifts_in_window: 0,
            stats,
        }
    }

    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    pub fn buffer_ms(&self) -> u64 {
        self.buffer.as_millis() as u64
    }

    /// Resize the buffer-ahead time. Affects only future scheduling.
    pub fn set_buffer_ms(&mut self, buffer_ms: u64) {
        self.buffer = Duration::from_millis(buffer_ms);
        self.late_threshold = late_threshold_for(buffer_ms);
    }

    pub fn set_word_space_threshold_ms(&mut self, ms: u64) {
        self.word_space_threshold = Duration::from_millis(ms);
    }

    pub fn set_late_threshold_ms(&mut self, ms: u64) {
        self.late_threshold = Duration::from_millis(ms);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedule one event. `now` is its arrival instant.
    pub fn push(&mut self, event: &Event, callsign: &Arc<str>, now: Instant) -> Push {
        debug_assert!(!event.is_eot());

        if self.discipline == Discipline::Relative {
            self.detect_word_space(now);
        }
        self.last_arrival = Some(now);

        let playout_at = match self.discipline {
            Discipline::Relative => self.relative_playout(event, now),
            Discipline::Absolute => self.absolute_playout(event, now),
        };

        let lateness = now.duration_since(playout_at);
        if lateness > self.late_threshold {
            SessionStats::bump(&self.stats.late_drops);
            debug!(
                sequence = event.sequence,
                late_ms = lateness.as_millis() as u64,
                "dropping late event"
            );
            return Push::LateDropped;
        }

        if self.discipline == Discipline::Relative {
            self.last_playout = Some(playout_at);
        }
        self.record_latency(playout_at, now);

        trace!(
            sequence = event.sequence,
            key_down = event.key_down(),
            ahead_ms = playout_at.duration_since(now).as_millis() as u64,
            "scheduled"
        );
        self.heap.push(Reverse(BufferedEvent {
            playout_at,
            sequence: event.sequence,
            key_down: event.key_down(),
            duration_ms: event.duration_ms,
            callsign: callsign.clone(),
        }));
        Push::Scheduled
    }

    /// Pop every event due at `now`, in playout order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<BufferedEvent> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.playout_at > now {
                break;
            }
            due.push(self.heap.pop().unwrap().0);
        }
        due
    }

    /// Drain everything regardless of schedule, in playout order.
    pub fn drain(&mut self) -> Vec<BufferedEvent> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(event)) = self.heap.pop() {
            all.push(event);
        }
        all
    }

    /// Playout instant of the head of the queue.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(event)| event.playout_at)
    }

    /// Forget the transmission timeline (EOT or >= 2 s silence). Queued
    /// events keep their schedule; the next event starts a fresh epoch.
    pub fn end_transmission(&mut self) {
        self.last_playout = None;
        self.epoch = None;
        self.last_arrival = None;
        self.shifts_in_window = 0;
    }

    /// Drop everything and forget the timeline (reconnect).
    pub fn clear(&mut self) {
        self.heap.clear();
        self.latencies.clear();
        self.end_transmission();
    }

    /// Scheduling latency over the recent arrival window.
    pub fn jitter(&self) -> JitterWindow {
        if self.latencies.is_empty() {
            return JitterWindow::default();
        }
        let min_ms = *self.latencies.iter().min().unwrap();
        let max_ms = *self.latencies.iter().max().unwrap();
        let sum: i64 = self.latencies.iter().sum();
        JitterWindow {
            samples: self.latencies.len(),
            min_ms,
            max_ms,
            avg_ms: sum / self.latencies.len() as i64,
        }
    }

    /// Sizing recommendation: grow when jitter eats the buffer or the
    /// timeline keeps shifting, shrink when the buffer dwarfs the jitter.
    pub fn advice(&self) -> BufferAdvice {
        let window = self.jitter();
        if window.samples < 8 {
            return BufferAdvice::Keep;
        }
        let buffer_ms = self.buffer.as_millis() as i64;
        if window.jitter_ms() > buffer_ms || self.shifts_in_window > 3 {
            BufferAdvice::Increase
        } else if window.jitter_ms() * 4 < buffer_ms && self.shifts_in_window == 0 {
            BufferAdvice::Decrease
        } else {
            BufferAdvice::Keep
        }
    }

    // ------------------------------------------------------------------
    // Scheduling internals
    // ------------------------------------------------------------------

    /// Relative discipline: an arrival gap beyond the threshold is an
    /// operator pause, not jitter. Re-synchronise to fresh reality: forget
    /// the chain and drop queued events that are already stale, otherwise
    /// queue depth grows without bound across every pause.
    fn detect_word_space(&mut self, now: Instant) {
        let Some(last_arrival) = self.last_arrival else {
            return;
        };
        if now.duration_since(last_arrival) <= self.word_space_threshold {
            return;
        }
        self.last_playout = None;
        SessionStats::bump(&self.stats.word_space_resets);
        let before = self.heap.len();
        if before > 0 {
            let kept: BinaryHeap<Reverse<BufferedEvent>> = self
                .heap
                .drain()
                .filter(|Reverse(e)| e.playout_at >= now)
                .collect();
            let dropped = before - kept.len();
            if dropped > 0 {
                SessionStats::add(&self.stats.late_drops, dropped as u64);
            }
            self.heap = kept;
        }
        debug!(dropped = before - self.heap.len(), "word-space timeline reset");
    }

    fn relative_playout(&mut self, event: &Event, now: Instant) -> Instant {
        match self.last_playout {
            None => now + self.buffer,
            Some(last) => {
                let projected = last + Duration::from_millis(event.duration_ms as u64);
                if projected < now {
                    SessionStats::bump(&self.stats.timeline_shifts);
                    self.shifts_in_window += 1;
                    now + LATE_SHIFT_EPSILON
                } else {
                    projected
                }
            }
        }
    }

    fn absolute_playout(&mut self, event: &Event, now: Instant) -> Instant {
        let ts = event.timestamp_ms.unwrap_or(0);
        let (anchor, first_ts) = *self.epoch.get_or_insert((now, ts));
        let base = anchor + self.buffer;
        if ts >= first_ts {
            base + Duration::from_millis((ts - first_ts) as u64)
        } else {
            // Older than the epoch event: reordering across the anchor.
            base.checked_sub(Duration::from_millis((first_ts - ts) as u64))
                .unwrap_or(anchor)
        }
    }

    fn record_latency(&mut self, playout_at: Instant, now: Instant) {
        let ahead = playout_at.duration_since(now).as_millis() as i64;
        let behind = now.duration_since(playout_at).as_millis() as i64;
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(ahead - behind);
    }
}

fn late_threshold_for(buffer_ms: u64) -> Duration {
    Duration::from_millis(500.max(buffer_ms + 100))
}
