//! Transmit side: turns key transitions into paced wire events.
//!
//! Three input paths share one event pipeline: direct `key` calls (straight
//! key or external keyer), `send_text` (automated sender), and `run_iambic`
//! (paddle-driven state machine). All of them pace in real time; events are
//! never burst. A local sink can mirror transitions for zero-latency TX
//! sidetone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::event::{Event, KeyState};
use crate::keyer::{IambicKeyer, KeyerConfig, PaddleInput};
use crate::{morse, timing};
use crate::protocol::{DatagramCodec, StreamCodec, WireMode};
use crate::sink::EventSink;
use crate::transport::Transport;

/// Paddle sampling interval for the iambic loop (1 kHz).
const SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

/// Builder for the transmit side.
pub struct SenderBuilder {
    callsign: String,
    mode: WireMode,
    wpm: u8,
    local_sink: Option<Arc<dyn EventSink>>,
    auto_eot: Duration,
}

impl Default for SenderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderBuilder {
    pub fn new() -> Self {
        Self {
            callsign: "local".to_string(),
            mode: WireMode::Datagram { extended: false },
            wpm: 20,
            local_sink: None,
            auto_eot: Duration::from_secs(2),
        }
    }

    pub fn callsign(mut self, callsign: &str) -> Self {
        self.callsign = callsign.to_string();
        self
    }

    /// Wire framing; must match the receiver.
    pub fn mode(mut self, mode: WireMode) -> Self {
        self.mode = mode;
        self
    }

    /// Speed for `send_text`, 5-60 WPM.
    pub fn wpm(mut self, wpm: u8) -> Self {
        self.wpm = wpm;
        self
    }

    /// Mirror transitions into a local sink (zero-latency TX sidetone).
    pub fn local_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.local_sink = Some(sink);
        self
    }

    /// Paddle idle time after which `run_iambic` sends EOT automatically.
    pub fn auto_eot_ms(mut self, ms: u64) -> Self {
        self.auto_eot = Duration::from_millis(ms);
        self
    }

    pub fn build<T: Transport>(self, transport: T) -> Sender<T> {
        let codec = match self.mode {
            WireMode::Datagram { extended: false } => TxCodec::Datagram(DatagramCodec::new()),
            WireMode::Datagram { extended: true } => TxCodec::Datagram(DatagramCodec::extended()),
            WireMode::Stream { timestamped } => TxCodec::Stream(StreamCodec::new(timestamped)),
        };
        Sender {
            transport,
            mode: self.mode,
            codec,
            callsign: self.callsign.into(),
            wpm: self.wpm,
            local_sink: self.local_sink,
            auto_eot: self.auto_eot,
            sequence: 0,
            epoch: None,
            last_transition: None,
            key_is_down: false,
        }
    }
}

enum TxCodec {
    Datagram(DatagramCodec),
    Stream(StreamCodec),
}

/// One sender endpoint: owns the transport, the sequence counter, and the
/// transmission epoch.
pub struct Sender<T: Transport> {
    transport: T,
    mode: WireMode,
    codec: TxCodec,
    callsign: Arc<str>,
    wpm: u8,
    local_sink: Option<Arc<dyn EventSink>>,
    auto_eot: Duration,
    sequence: u8,
    /// Sender clock origin of the current transmission; `None` between
    /// transmissions.
    epoch: Option<Instant>,
    last_transition: Option<Instant>,
    key_is_down: bool,
}

impl<T: Transport> Sender<T> {
    pub fn is_key_down(&self) -> bool {
        self.key_is_down
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn wpm(&self) -> u8 {
        self.wpm
    }

    /// Change the text-sending speed at runtime.
    pub fn set_wpm(&mut self, wpm: u8) -> Result<()> {
        if !(timing::MIN_WPM..=timing::MAX_WPM).contains(&wpm) {
            return Err(Error::InvalidParameter(format!(
                "speed must be {}-{} WPM, got {wpm}",
                timing::MIN_WPM,
                timing::MAX_WPM
            )));
        }
        self.wpm = wpm;
        Ok(())
    }

    /// Key transition from a straight key or an external keyer. Repeated
    /// same-state calls are ignored.
    pub async fn key(&mut self, down: bool) -> Result<()> {
        if down == self.key_is_down {
            return Ok(());
        }
        self.transition_at(down, Instant::now()).await
    }

    /// End the transmission: raises the key if needed, emits the EOT
    /// marker, and resets the epoch. The next key-down starts a fresh
    /// transmission. Senders should idle >= 1 s before keying again so the
    /// receiver's buffer drains without overlap.
    pub async fn send_eot(&mut self) -> Result<()> {
        if self.epoch.is_none() {
            return Ok(());
        }
        if self.key_is_down {
            self.transition_at(false, Instant::now()).await?;
        }
        let now = Instant::now();
        let event = Event {
            sequence: self.next_sequence(),
            state: KeyState::EndOfTransmission,
            duration_ms: 0,
            timestamp_ms: self.timestamp(now),
        };
        debug!(sequence = event.sequence, "EOT");
        self.write(&event).await?;
        self.epoch = None;
        self.last_transition = None;
        Ok(())
    }

    /// Send text as paced CW at the configured WPM, followed by EOT.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        debug!(wpm = self.wpm, %text, "sending text");
        for (down, duration_ms) in morse::text_to_elements(text, self.wpm) {
            self.key(down).await?;
            tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
        }
        self.send_eot().await
    }

    /// Drive the iambic keyer from the paddle latch until cancelled.
    ///
    /// Samples at 1 kHz so Mode-B memory observes the paddles mid-element,
    /// and paces transitions on the keyer's own timeline. Sends EOT after
    /// the configured idle time, and raises the key on cancellation.
    pub async fn run_iambic(
        &mut self,
        paddles: &PaddleInput,
        cfg: KeyerConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut keyer = IambicKeyer::new(cfg);
        let origin = Instant::now();
        debug!(wpm = cfg.wpm, mode = ?cfg.mode, "iambic keyer running");

        loop {
            let now = Instant::now();
            let now_ms = now.duration_since(origin).as_millis() as u64;

            if let Some(transition) = keyer.tick(now_ms, paddles.dit(), paddles.dah()) {
                // Pace on the keyer's scheduled time, not the sample tick.
                let at = origin + Duration::from_millis(transition.at_ms);
                self.transition_at(transition.key_down, at).await?;
            }

            if keyer.is_idle() && !self.key_is_down && self.epoch.is_some() {
                if let Some(last) = self.last_transition {
                    if now.duration_since(last) >= self.auto_eot {
                        self.send_eot().await?;
                    }
                }
            }

            let mut deadline = now + SAMPLE_INTERVAL;
            if let Some(wake_ms) = keyer.next_wake_ms() {
                deadline = deadline.min(origin + Duration::from_millis(wake_ms));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if self.key_is_down {
                        self.key(false).await?;
                    }
                    debug!("iambic keyer stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn transition_at(&mut self, down: bool, at: Instant) -> Result<()> {
        if self.epoch.is_none() && down {
            self.epoch = Some(at);
        }
        let duration = self
            .last_transition
            .map(|last| at.duration_since(last).as_millis().min(u16::MAX as u128) as u16)
            .unwrap_or(0);
        let event = Event {
            sequence: self.next_sequence(),
            state: if down { KeyState::Down } else { KeyState::Up },
            duration_ms: self.clamp_duration(duration),
            timestamp_ms: self.timestamp(at),
        };
        self.last_transition = Some(at);
        self.key_is_down = down;

        if let Some(sink) = &self.local_sink {
            sink.on_key(&self.callsign, down);
        }
        trace!(
            sequence = event.sequence,
            key_down = down,
            duration_ms = event.duration_ms,
            "tx"
        );
        self.write(&event).await
    }

    async fn write(&mut self, event: &Event) -> Result<()> {
        let bytes = match &self.codec {
            TxCodec::Datagram(codec) => codec.encode(event)?,
            TxCodec::Stream(codec) => codec.encode(event),
        };
        self.transport.send(&bytes).await
    }

    fn next_sequence(&mut self) -> u8 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    fn timestamp(&self, at: Instant) -> Option<u32> {
        if !self.mode.timestamped() {
            return None;
        }
        let epoch = self.epoch?;
        Some(at.duration_since(epoch).as_millis() as u32)
    }

    /// The compact datagram form cannot carry long pauses; clamp and let
    /// the receiver's word-space detection reconstruct them.
    fn clamp_duration(&self, duration_ms: u16) -> u16 {
        match self.mode {
            WireMode::Datagram { extended: false } => duration_ms.min(u8::MAX as u16),
            _ => duration_ms,
        }
    }
}
