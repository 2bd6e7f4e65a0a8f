//! Sink seam: what the core calls at playout time.
//!
//! The buffer never hard-wires audio; drivers hand in a trait object and do
//! whatever they want with the transitions (sidetone, GPIO, a decoder).

use std::sync::{Arc, Mutex};

use tokio::time::Instant;

/// Callbacks dispatched by the playout worker and relay plumbing.
///
/// `on_key` runs on the playout worker's thread at the scheduled instant;
/// implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_key(&self, callsign: &str, key_down: bool);

    fn on_decoded_char(&self, _callsign: &str, _ch: char) {}

    fn on_peer_joined(&self, _callsign: &str) {}

    fn on_peer_left(&self, _callsign: &str) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_key(&self, _callsign: &str, _key_down: bool) {}
}

/// One observed `on_key` call.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub at: Instant,
    pub callsign: String,
    pub key_down: bool,
}

/// Records dispatch instants for assertions. Clone handles share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<KeyRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<KeyRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Milliseconds between consecutive dispatches.
    pub fn gaps_ms(&self) -> Vec<u64> {
        let records = self.records.lock().unwrap();
        records
            .windows(2)
            .map(|w| w[1].at.duration_since(w[0].at).as_millis() as u64)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_key(&self, callsign: &str, key_down: bool) {
        self.records.lock().unwrap().push(KeyRecord {
            at: Instant::now(),
            callsign: callsign.to_string(),
            key_down,
        });
    }
}
