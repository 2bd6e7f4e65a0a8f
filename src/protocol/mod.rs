//! Wire formats for keying events.
//!
//! Two binary framings (datagram and length-prefixed stream) plus the
//! WebSocket-JSON variant for browser/relay interop. All encoders are pure;
//! the stream decoder buffers partial frames.

pub mod datagram;
pub mod json;
pub mod stream;

pub use datagram::DatagramCodec;
pub use json::{Peer, RelayMessage};
pub use stream::StreamCodec;

use crate::buffer::Discipline;

/// Wire byte for a key-up transition.
pub const KEY_STATE_UP: u8 = 0x00;
/// Wire byte for a key-down transition.
pub const KEY_STATE_DOWN: u8 = 0x01;
/// Wire byte for the end-of-transmission marker.
pub const KEY_STATE_EOT: u8 = 0xFF;

/// Which framing a session speaks. Both peers must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// 3-byte events (4 with `extended` u16 durations), UDP-style.
    Datagram { extended: bool },
    /// Length-prefixed frames, TCP-style; `timestamped` adds a u32
    /// sender-clock timestamp per event.
    Stream { timestamped: bool },
}

impl WireMode {
    /// The scheduling discipline this framing implies: timestamps get
    /// absolute scheduling, everything else chains durations.
    pub fn discipline(self) -> Discipline {
        match self {
            WireMode::Stream { timestamped: true } => Discipline::Absolute,
            _ => Discipline::Relative,
        }
    }

    pub fn timestamped(self) -> bool {
        matches!(self, WireMode::Stream { timestamped: true })
    }
}
