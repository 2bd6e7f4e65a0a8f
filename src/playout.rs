//! Playout worker: a single cooperative task that pops the jitter buffer
//! and dispatches key transitions at their scheduled instants. The worker
//! IS the wall clock; the sink sees transitions exactly when they are due.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::buffer::JitterBuffer;
use crate::sink::EventSink;

/// Poll interval while the queue is empty.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Buffer state shared between the ingest side and the playout worker. The
/// worker is the only popper; ingestion pushes under the mutex and rings
/// the notify so an earlier head wakes the worker out of its sleep.
pub(crate) struct PlayoutShared {
    pub buffer: Mutex<JitterBuffer>,
    pub notify: Notify,
}

impl PlayoutShared {
    pub fn new(buffer: JitterBuffer) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            notify: Notify::new(),
        }
    }
}

pub(crate) fn spawn_playout(
    shared: Arc<PlayoutShared>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(playout_loop(shared, sink, cancel))
}

async fn playout_loop(
    shared: Arc<PlayoutShared>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    debug!("playout worker started");
    loop {
        let deadline = shared
            .buffer
            .lock()
            .unwrap()
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + IDLE_TICK);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            // New head may be earlier than the current sleep.
            _ = shared.notify.notified() => continue,

            _ = tokio::time::sleep_until(deadline) => {
                let due = shared.buffer.lock().unwrap().pop_due(Instant::now());
                // Dispatch outside the lock.
                for event in due {
                    trace!(
                        sequence = event.sequence,
                        key_down = event.key_down,
                        "dispatch"
                    );
                    sink.on_key(&event.callsign, event.key_down);
                }
            }
        }
    }

    // Stop requested: drain whatever is still queued, in order, then return.
    let pending = shared.buffer.lock().unwrap().drain();
    if !pending.is_empty() {
        debug!(drained = pending.len(), "draining on shutdown");
        for event in pending {
            sink.on_key(&event.callsign, event.key_down);
        }
    }
    debug!("playout worker exiting");
}
