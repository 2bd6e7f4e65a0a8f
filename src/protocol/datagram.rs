//! Datagram (UDP-style) framing: 3 bytes per event, 4 with extended durations.
//!
//! ```text
//! byte 0: sequence     (u8, wrapping)
//! byte 1: key_state    (0x00 = UP, 0x01 = DOWN, 0xFF = EOT)
//! byte 2: duration_ms  (u8; or u16 big-endian over bytes 2-3 when extended)
//! ```
//!
//! The compact form carries durations as direct u8 milliseconds. Durations
//! that do not fit are an encode error; senders that stay compact clamp
//! before encoding and rely on the receiver's word-space detection to
//! reconstruct long pauses.

use crate::error::{Error, Result};
use crate::event::{Event, KeyState};

#[derive(Debug, Clone, Copy, Default)]
pub struct DatagramCodec {
    extended: bool,
}

impl DatagramCodec {
    /// Compact 3-byte framing.
    pub fn new() -> Self {
        Self { extended: false }
    }

    /// 4-byte framing with u16 big-endian durations.
    pub fn extended() -> Self {
        Self { extended: true }
    }

    /// Bytes per event under this framing.
    pub fn frame_len(&self) -> usize {
        if self.extended { 4 } else { 3 }
    }

    pub fn encode(&self, event: &Event) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.frame_len());
        out.push(event.sequence);
        out.push(event.state.to_wire());
        if self.extended {
            out.extend_from_slice(&event.duration_ms.to_be_bytes());
        } else {
            if event.duration_ms > u8::MAX as u16 {
                return Err(Error::DurationOverflow(event.duration_ms));
            }
            out.push(event.duration_ms as u8);
        }
        Ok(out)
    }

    /// Decode one event from the front of `buf`, returning the byte count
    /// consumed.
    pub fn decode(&self, buf: &[u8]) -> Result<(Event, usize)> {
        let need = self.frame_len();
        if buf.len() < need {
            return Err(Error::ShortFrame {
                need,
                have: buf.len(),
            });
        }
        let state = KeyState::from_wire(buf[1])?;
        let duration_ms = if self.extended {
            u16::from_be_bytes([buf[2], buf[3]])
        } else {
            buf[2] as u16
        };
        Ok((
            Event {
                sequence: buf[0],
                state,
                duration_ms,
                timestamp_ms: None,
            },
            need,
        ))
    }

    /// Decode every event in a datagram. A datagram carrying a partial
    /// trailing frame is malformed (`ShortFrame`); datagrams are never
    /// split across reads.
    pub fn decode_all(&self, buf: &[u8]) -> Result<Vec<Event>> {
        let mut events = Vec::with_capacity(buf.len() / self.frame_len());
        let mut offset = 0;
        while offset < buf.len() {
            let (event, used) = self.decode(&buf[offset..])?;
            events.push(event);
            offset += used;
        }
        Ok(events)
    }
}
