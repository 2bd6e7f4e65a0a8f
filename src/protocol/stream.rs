//! Stream (TCP-style) framing: length-prefixed events with optional
//! per-event timestamps.
//!
//! ```text
//! u16 big-endian payload length   (not counting itself)
//! u8  sequence
//! u8  key_state
//! u8 or u16 big-endian duration_ms   (u16 iff >= 256)
//! u32 big-endian timestamp_ms        (timestamped mode only)
//! ```
//!
//! Valid payload lengths are therefore 3 or 4 (duration mode) and 7 or 8
//! (timestamped mode). The decoder is a push parser: `feed` bytes as they
//! arrive, then drain complete events with `next_event`; partial frames stay
//! buffered across reads.

use crate::error::{Error, Result};
use crate::event::{Event, KeyState};

/// Frames longer than any valid event are treated as stream corruption
/// rather than skipped.
const MAX_PAYLOAD: usize = 16;

#[derive(Debug, Default)]
pub struct StreamCodec {
    timestamped: bool,
    buf: Vec<u8>,
}

impl StreamCodec {
    pub fn new(timestamped: bool) -> Self {
        Self {
            timestamped,
            buf: Vec::new(),
        }
    }

    pub fn timestamped(&self) -> bool {
        self.timestamped
    }

    /// Encode one event. The duration width is picked automatically; the
    /// timestamp field is present iff the codec is timestamped.
    pub fn encode(&self, event: &Event) -> Vec<u8> {
        let wide = event.duration_ms > u8::MAX as u16;
        let payload_len = match (self.timestamped, wide) {
            (false, false) => 3usize,
            (false, true) => 4,
            (true, false) => 7,
            (true, true) => 8,
        };
        let mut out = Vec::with_capacity(2 + payload_len);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
        out.push(event.sequence);
        out.push(event.state.to_wire());
        if wide {
            out.extend_from_slice(&event.duration_ms.to_be_bytes());
        } else {
            out.push(event.duration_ms as u8);
        }
        if self.timestamped {
            out.extend_from_slice(&event.timestamp_ms.unwrap_or(0).to_be_bytes());
        }
        out
    }

    /// Buffer incoming bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered (incomplete frame remainder).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame, e.g. across a reconnect.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Pop the next complete event, `Ok(None)` if more bytes are needed.
    ///
    /// A frame whose length belongs to the other mode (timestamp presence or
    /// duration width mismatch) is consumed and reported as
    /// `TruncatedDuration`; a length no mode produces is `BadLength` and
    /// poisons the buffer, since frame boundaries are lost.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;

        let valid = if self.timestamped { [7, 8] } else { [3, 4] };
        let other = if self.timestamped { [3, 4] } else { [7, 8] };
        if !valid.contains(&len) {
            if other.contains(&len) && self.buf.len() >= 2 + len {
                self.buf.drain(..2 + len);
                return Err(Error::TruncatedDuration(len));
            }
            if other.contains(&len) {
                // Wrong mode but incomplete; wait so the frame can be skipped
                // whole once it arrives.
                return Ok(None);
            }
            if len > MAX_PAYLOAD {
                self.buf.clear();
            } else {
                self.buf.drain(..(2 + len).min(self.buf.len()));
            }
            return Err(Error::BadLength(len));
        }

        if self.buf.len() < 2 + len {
            return Ok(None);
        }

        let payload: Vec<u8> = self.buf.drain(..2 + len).skip(2).collect();
        let state = KeyState::from_wire(payload[1])?;
        let wide = len == 4 || len == 8;
        let duration_ms = if wide {
            u16::from_be_bytes([payload[2], payload[3]])
        } else {
            payload[2] as u16
        };
        let timestamp_ms = if self.timestamped {
            let at = if wide { 4 } else { 3 };
            Some(u32::from_be_bytes([
                payload[at],
                payload[at + 1],
                payload[at + 2],
                payload[at + 3],
            ]))
        } else {
            None
        };
        Ok(Some(Event {
            sequence: payload[0],
            state,
            duration_ms,
            timestamp_ms,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(sequence: u8, state: KeyState, duration_ms: u16, timestamp_ms: Option<u32>) -> Event {
        Event {
            sequence,
            state,
            duration_ms,
            timestamp_ms,
        }
    }

    #[test]
    fn baseline_layout() {
        let codec = StreamCodec::new(false);
        let bytes = codec.encode(&ev(5, KeyState::Down, 48, None));
        assert_eq!(bytes, vec![0x00, 0x03, 5, 0x01, 48]);
    }

    #[test]
    fn wide_duration_layout() {
        let codec = StreamCodec::new(false);
        let bytes = codec.encode(&ev(5, KeyState::Up, 700, None));
        assert_eq!(bytes, vec![0x00, 0x04, 5, 0x00, 0x02, 0xBC]);
    }

    #[test]
    fn timestamped_layout() {
        let codec = StreamCodec::new(true);
        let bytes = codec.encode(&ev(1, KeyState::Up, 48, Some(0x0102_0304)));
        assert_eq!(
            bytes,
            vec![0x00, 0x07, 1, 0x00, 48, 0x01, 0x02, 0x03, 0x04]
        );
    }

    #[test]
    fn round_trip_all_shapes() {
        for timestamped in [false, true] {
            let mut codec = StreamCodec::new(timestamped);
            for duration in [0u16, 255, 256, 2000] {
                let ts = timestamped.then_some(123_456u32);
                let event = ev(42, KeyState::Down, duration, ts);
                let bytes = codec.encode(&event);
                codec.feed(&bytes);
                assert_eq!(codec.next_event().unwrap(), Some(event));
                assert_eq!(codec.pending(), 0);
            }
        }
    }

    #[test]
    fn partial_frames_buffer() {
        let mut codec = StreamCodec::new(true);
        let bytes = codec.encode(&ev(9, KeyState::Down, 48, Some(1000)));
        for &b in &bytes[..bytes.len() - 1] {
            codec.feed(&[b]);
            assert_eq!(codec.next_event().unwrap(), None);
        }
        codec.feed(&bytes[bytes.len() - 1..]);
        let event = codec.next_event().unwrap().unwrap();
        assert_eq!(event.sequence, 9);
        assert_eq!(event.timestamp_ms, Some(1000));
    }

    #[test]
    fn two_events_one_read() {
        let mut codec = StreamCodec::new(false);
        let mut bytes = codec.encode(&ev(1, KeyState::Down, 0, None));
        bytes.extend(codec.encode(&ev(2, KeyState::Up, 48, None)));
        codec.feed(&bytes);
        assert_eq!(codec.next_event().unwrap().unwrap().sequence, 1);
        assert_eq!(codec.next_event().unwrap().unwrap().sequence, 2);
        assert_eq!(codec.next_event().unwrap(), None);
    }

    #[test]
    fn wrong_mode_frame_is_truncated_duration() {
        // A 3-byte duration-mode payload fed to a timestamped decoder.
        let mut rx = StreamCodec::new(true);
        rx.feed(&StreamCodec::new(false).encode(&ev(1, KeyState::Down, 10, None)));
        assert!(matches!(rx.next_event(), Err(Error::TruncatedDuration(3))));
        // The bad frame was consumed.
        assert_eq!(rx.pending(), 0);
    }

    #[test]
    fn garbage_length_poisons_buffer() {
        let mut codec = StreamCodec::new(false);
        codec.feed(&[0x40, 0x00, 1, 2, 3]);
        assert!(matches!(codec.next_event(), Err(Error::BadLength(0x4000))));
        assert_eq!(codec.pending(), 0);
    }

    #[test]
    fn decode_resumes_after_bad_frame() {
        let mut codec = StreamCodec::new(false);
        // Valid length (4) but garbage key state, then a good event.
        codec.feed(&[0x00, 0x03, 1, 0x66, 10]);
        let good = codec.encode(&ev(2, KeyState::Down, 20, None));
        codec.feed(&good);
        assert!(matches!(codec.next_event(), Err(Error::BadKeyState(0x66))));
        assert_eq!(codec.next_event().unwrap().unwrap().sequence, 2);
    }
}
