//! Receive-side session controller.
//!
//! One spawned task owns the transport and drives codec → sequence tracker
//! → state validator → jitter buffer; a biased select loop multiplexes
//! cancellation, commands, incoming bytes, and the housekeeping tick
//! (silence reset + watchdog). A second task (the playout worker) owns the
//! pop side of the buffer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::buffer::{
    BufferAdvice, DEFAULT_BUFFER_MS, DEFAULT_WORD_SPACE_THRESHOLD_MS, JitterBuffer, Push,
};
use crate::error::Result;
use crate::event::{Event, SessionEvent};
use crate::playout::{PlayoutShared, spawn_playout};
use crate::protocol::{DatagramCodec, StreamCodec, WireMode};
use crate::sink::{EventSink, NullSink};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::tracker::{Arrival, SequenceTracker};
use crate::transport::Transport;
use crate::validator::StateValidator;

/// Sender silence after which the transmission timeline is forgotten.
const SILENCE_RESET: Duration = Duration::from_secs(2);

/// Sender silence after which a hardware-keying receiver forces key-up.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(3);

const HOUSEKEEPING_TICK: Duration = Duration::from_millis(100);

/// Default for how long shutdown waits for the playout worker to drain.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
enum Command {
    SetBufferMs(u64),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Builder for a receiving session.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use cwlink::{SessionBuilder, WireMode, NullSink};
/// # async fn example() -> cwlink::Result<()> {
/// let transport = cwlink::UdpLink::bind(("0.0.0.0", cwlink::transport::UDP_PORT)).await?;
/// let session = SessionBuilder::new()
///     .callsign("W1AW")
///     .mode(WireMode::Datagram { extended: false })
///     .buffer_ms(150)
///     .sink(Arc::new(NullSink))
///     .build(transport);
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    callsign: Option<String>,
    mode: WireMode,
    buffer_ms: u64,
    word_space_threshold_ms: u64,
    late_threshold_ms: Option<u64>,
    watchdog: bool,
    sink: Arc<dyn EventSink>,
    event_capacity: usize,
    drain_timeout: Duration,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            callsign: None,
            mode: WireMode::Datagram { extended: false },
            buffer_ms: DEFAULT_BUFFER_MS,
            word_space_threshold_ms: DEFAULT_WORD_SPACE_THRESHOLD_MS,
            late_threshold_ms: None,
            watchdog: false,
            sink: Arc::new(NullSink),
            event_capacity: 64,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Label passed to the sink for this sender. Defaults to the
    /// transport's peer label.
    pub fn callsign(mut self, callsign: &str) -> Self {
        self.callsign = Some(callsign.to_string());
        self
    }

    /// Wire framing; also selects the scheduling discipline.
    pub fn mode(mut self, mode: WireMode) -> Self {
        self.mode = mode;
        self
    }

    /// Buffer-ahead time, 0-2000 ms. 0 plays immediately.
    pub fn buffer_ms(mut self, ms: u64) -> Self {
        self.buffer_ms = ms.min(2000);
        self
    }

    /// Arrival-gap threshold for word-space detection (relative discipline).
    pub fn word_space_threshold_ms(mut self, ms: u64) -> Self {
        self.word_space_threshold_ms = ms;
        self
    }

    /// Override the late-drop threshold.
    pub fn late_threshold_ms(mut self, ms: u64) -> Self {
        self.late_threshold_ms = Some(ms);
        self
    }

    /// Enable the key-release watchdog. Required when the sink drives real
    /// keying hardware.
    pub fn watchdog(mut self, enabled: bool) -> Self {
        self.watchdog = enabled;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Capacity of the session event broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// How long `shutdown` waits for the playout worker to drain.
    pub fn drain_timeout_ms(mut self, ms: u64) -> Self {
        self.drain_timeout = Duration::from_millis(ms);
        self
    }

    /// Spawn the receive loop and the playout worker on the given transport.
    pub fn build<T: Transport + 'static>(self, transport: T) -> Session {
        let stats = Arc::new(SessionStats::default());
        let mut buffer = JitterBuffer::new(self.mode.discipline(), self.buffer_ms, stats.clone());
        buffer.set_word_space_threshold_ms(self.word_space_threshold_ms);
        if let Some(ms) = self.late_threshold_ms {
            buffer.set_late_threshold_ms(ms);
        }
        let shared = Arc::new(PlayoutShared::new(buffer));
        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let callsign: Arc<str> = self
            .callsign
            .unwrap_or_else(|| transport.peer_label())
            .into();

        let playout_task = spawn_playout(shared.clone(), self.sink.clone(), cancel.clone());

        let state = RxState {
            callsign,
            codec: RxCodec::new(self.mode),
            tracker: SequenceTracker::new(),
            validator: StateValidator::new(),
            shared: shared.clone(),
            sink: self.sink,
            stats: stats.clone(),
            event_tx: event_tx.clone(),
            watchdog: self.watchdog,
            last_packet: None,
            silence_reset_done: false,
            watchdog_done: false,
        };
        let rx_task = tokio::spawn(rx_loop(transport, cmd_rx, cancel.clone(), state));

        Session {
            cmd_tx,
            cancel,
            rx_task: Some(rx_task),
            playout_task: Some(playout_task),
            event_tx,
            stats,
            shared,
            drain_timeout: self.drain_timeout,
        }
    }
}

/// Handle to a running receive session.
pub struct Session {
    cmd_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    rx_task: Option<JoinHandle<()>>,
    playout_task: Option<JoinHandle<()>>,
    event_tx: broadcast::Sender<SessionEvent>,
    stats: Arc<SessionStats>,
    shared: Arc<PlayoutShared>,
    drain_timeout: Duration,
}

impl Session {
    /// Subscribe to session events (loss, violations, EOT statistics, ...).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Cumulative counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Events currently waiting for playout.
    pub fn queued(&self) -> usize {
        self.shared.buffer.lock().unwrap().len()
    }

    /// Advisory buffer sizing recommendation.
    pub fn buffer_advice(&self) -> BufferAdvice {
        self.shared.buffer.lock().unwrap().advice()
    }

    /// Resize the jitter buffer at runtime. Affects future scheduling only.
    pub async fn set_buffer_ms(&self, ms: u64) -> Result<()> {
        self.cmd_tx
            .send(Command::SetBufferMs(ms))
            .await
            .map_err(|_| crate::error::Error::NotConnected)
    }

    /// Stop the session: the receive loop exits, the playout worker drains
    /// pending events, bounded by a 2 s timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = tokio::time::timeout(Duration::from_millis(500), reply_rx).await;
        }
        self.cancel.cancel();
        let mut drained = true;
        if let Some(mut handle) = self.playout_task.take() {
            if tokio::time::timeout(self.drain_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!("playout worker did not drain in time");
                handle.abort();
                drained = false;
            }
        }
        if let Some(mut handle) = self.rx_task.take() {
            if tokio::time::timeout(Duration::from_millis(500), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        if drained {
            Ok(())
        } else {
            Err(crate::error::Error::Timeout)
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.rx_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.playout_task.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

enum RxCodec {
    Datagram(DatagramCodec),
    Stream(StreamCodec),
}

impl RxCodec {
    fn new(mode: WireMode) -> Self {
        match mode {
            WireMode::Datagram { extended: false } => RxCodec::Datagram(DatagramCodec::new()),
            WireMode::Datagram { extended: true } => RxCodec::Datagram(DatagramCodec::extended()),
            WireMode::Stream { timestamped } => RxCodec::Stream(StreamCodec::new(timestamped)),
        }
    }

    fn reset(&mut self) {
        if let RxCodec::Stream(codec) = self {
            codec.reset();
        }
    }
}

struct RxState {
    callsign: Arc<str>,
    codec: RxCodec,
    tracker: SequenceTracker,
    validator: StateValidator,
    shared: Arc<PlayoutShared>,
    sink: Arc<dyn EventSink>,
    stats: Arc<SessionStats>,
    event_tx: broadcast::Sender<SessionEvent>,
    watchdog: bool,
    last_packet: Option<Instant>,
    silence_reset_done: bool,
    watchdog_done: bool,
}

async fn rx_loop<T: Transport>(
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    mut st: RxState,
) {
    let mut read_buf = [0u8; 2048];
    let mut tick = tokio::time::interval(HOUSEKEEPING_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(peer = %transport.peer_label(), "session started");
    let _ = st.event_tx.send(SessionEvent::Connected);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("session cancelled");
                break;
            }

            cmd = cmd_rx.recv() => match cmd {
                Some(Command::SetBufferMs(ms)) => {
                    debug!(ms, "buffer resized");
                    st.shared.buffer.lock().unwrap().set_buffer_ms(ms);
                }
                Some(Command::Shutdown { reply }) => {
                    debug!("session shutdown requested");
                    let _ = reply.send(());
                    return;
                }
                None => break,
            },

            result = transport.recv(&mut read_buf) => match result {
                Ok(0) => {
                    warn!("transport closed");
                    let _ = st.event_tx.send(SessionEvent::Disconnected);
                    match transport.reconnect().await {
                        Ok(()) => st.on_reconnected(),
                        Err(e) => {
                            debug!(error = %e, "no reconnect, session over");
                            break;
                        }
                    }
                }
                Ok(n) => st.ingest(&read_buf[..n], Instant::now()),
                Err(e) => {
                    warn!(error = %e, "transport error");
                    let _ = st.event_tx.send(SessionEvent::Disconnected);
                    match transport.reconnect().await {
                        Ok(()) => st.on_reconnected(),
                        Err(_) => break,
                    }
                }
            },

            _ = tick.tick() => st.housekeeping(Instant::now()),
        }
    }

    debug!("session loop exiting");
}

impl RxState {
    fn ingest(&mut self, bytes: &[u8], now: Instant) {
        trace!(len = bytes.len(), "rx");
        self.last_packet = Some(now);
        self.silence_reset_done = false;
        self.watchdog_done = false;

        match &mut self.codec {
            RxCodec::Datagram(codec) => match codec.decode_all(bytes) {
                Ok(events) => {
                    for event in events {
                        self.handle_event(event, now);
                    }
                }
                Err(e) => {
                    SessionStats::bump(&self.stats.decode_errors);
                    warn!(error = %e, "dropping malformed datagram");
                }
            },
            RxCodec::Stream(codec) => {
                codec.feed(bytes);
                let mut events = Vec::new();
                loop {
                    match codec.next_event() {
                        Ok(Some(event)) => events.push(event),
                        Ok(None) => break,
                        Err(e) => {
                            SessionStats::bump(&self.stats.decode_errors);
                            warn!(error = %e, "dropping malformed frame");
                        }
                    }
                }
                for event in events {
                    self.handle_event(event, now);
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event, now: Instant) {
        SessionStats::bump(&self.stats.received);

        match self.tracker.observe(event.sequence) {
            Arrival::Duplicate => {
                SessionStats::bump(&self.stats.duplicates);
                trace!(sequence = event.sequence, "duplicate dropped");
                return;
            }
            Arrival::Reordered => {
                SessionStats::bump(&self.stats.reordered);
                debug!(sequence = event.sequence, "stale reordered packet dropped");
                return;
            }
            Arrival::Lost(missing) => {
                SessionStats::add(&self.stats.lost, missing as u64);
                debug!(missing, before = event.sequence, "packet loss");
                let _ = self.event_tx.send(SessionEvent::PacketLoss { missing });
            }
            Arrival::Fresh => {}
        }

        if event.is_eot() {
            self.on_eot();
            return;
        }

        if !self.validator.check(&event) {
            SessionStats::bump(&self.stats.state_errors);
            let _ = self.event_tx.send(SessionEvent::StateViolation {
                sequence: event.sequence,
            });
        }

        let outcome = self
            .shared
            .buffer
            .lock()
            .unwrap()
            .push(&event, &self.callsign, now);
        if outcome == Push::Scheduled {
            self.shared.notify.notify_one();
        }
    }

    /// EOT is a signal, not a timeline reset: queued events play out.
    fn on_eot(&mut self) {
        self.validator.reset();
        self.shared.buffer.lock().unwrap().end_transmission();
        SessionStats::bump(&self.stats.transmissions);
        let snapshot = self.stats.snapshot();
        info!(callsign = %self.callsign, stats = %snapshot, "end of transmission");
        let _ = self
            .event_tx
            .send(SessionEvent::TransmissionEnded(snapshot));
    }

    fn housekeeping(&mut self, now: Instant) {
        let Some(last) = self.last_packet else {
            return;
        };
        let silence = now.duration_since(last);

        if !self.silence_reset_done && silence >= SILENCE_RESET {
            debug!("sender went silent, forgetting timeline");
            self.validator.reset();
            self.shared.buffer.lock().unwrap().end_transmission();
            self.silence_reset_done = true;
        }

        if self.watchdog && !self.watchdog_done && silence >= WATCHDOG_TIMEOUT {
            warn!(
                silence_ms = silence.as_millis() as u64,
                "watchdog: forcing key up"
            );
            self.sink.on_key(&self.callsign, false);
            SessionStats::bump(&self.stats.watchdog_trips);
            let _ = self.event_tx.send(SessionEvent::WatchdogReleased);
            self.watchdog_done = true;
        }
    }

    /// Fresh connection: buffer, tracker, validator, and epoch all restart.
    fn on_reconnected(&mut self) {
        info!("transport re-established, fresh transmission epoch");
        self.codec.reset();
        self.tracker.reset();
        self.validator.reset();
        self.shared.buffer.lock().unwrap().clear();
        self.last_packet = None;
        self.silence_reset_done = false;
        self.watchdog_done = false;
        let _ = self.event_tx.send(SessionEvent::Reconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLink;

    #[tokio::test]
    async fn builder_defaults() {
        let session = SessionBuilder::new().build(MockLink::new());
        assert_eq!(session.queued(), 0);
        assert_eq!(session.stats().received, 0);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn set_buffer_ms_applies() {
        let session = SessionBuilder::new()
            .mode(WireMode::Stream { timestamped: true })
            .buffer_ms(100)
            .build(MockLink::new());
        session.set_buffer_ms(400).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.shared.buffer.lock().unwrap().buffer_ms(), 400);
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_under_drop() {
        let session = SessionBuilder::new().build(MockLink::new());
        // Dropping without shutdown must not hang or panic.
        drop(session);
    }
}
