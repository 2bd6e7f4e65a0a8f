//! Keying events: the wire data model and the session broadcast type.

use crate::error::{Error, Result};
use crate::protocol::{KEY_STATE_DOWN, KEY_STATE_EOT, KEY_STATE_UP};
use crate::stats::StatsSnapshot;

/// The state a key transition moves TO, or the end-of-transmission marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Up,
    Down,
    /// End of a logical utterance. A signal to the application and the
    /// validator, not a timeline reset.
    EndOfTransmission,
}

impl KeyState {
    /// Wire byte for this state.
    pub fn to_wire(self) -> u8 {
        match self {
            KeyState::Up => KEY_STATE_UP,
            KeyState::Down => KEY_STATE_DOWN,
            KeyState::EndOfTransmission => KEY_STATE_EOT,
        }
    }

    /// Decode a wire state byte.
    pub fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            KEY_STATE_UP => Ok(KeyState::Up),
            KEY_STATE_DOWN => Ok(KeyState::Down),
            KEY_STATE_EOT => Ok(KeyState::EndOfTransmission),
            other => Err(Error::BadKeyState(other)),
        }
    }
}

/// A single keying transition.
///
/// `duration_ms` records how long the *previous* key state lasted: the element
/// just completed when transitioning to UP, the spacing just completed when
/// transitioning to DOWN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// 8-bit wrapping counter, unique within a transmission.
    pub sequence: u8,
    pub state: KeyState,
    pub duration_ms: u16,
    /// Milliseconds since the transmission began, on the sender's clock.
    /// Present only on the timestamped wire variant.
    pub timestamp_ms: Option<u32>,
}

impl Event {
    pub fn key_down(&self) -> bool {
        matches!(self.state, KeyState::Down)
    }

    pub fn is_eot(&self) -> bool {
        matches!(self.state, KeyState::EndOfTransmission)
    }
}

/// Events emitted by a session via broadcast channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session is up and listening.
    Connected,

    /// Transport dropped; a stream session will try to reconnect.
    Disconnected,

    /// Stream transport re-established. Buffer and epoch were reset.
    Reconnected,

    /// EOT marker received; statistics for the transmission that just ended.
    TransmissionEnded(StatsSnapshot),

    /// The alternation invariant was violated (double-DOWN or double-UP).
    /// The offending event is still played.
    StateViolation { sequence: u8 },

    /// The sequence tracker detected missing packets.
    PacketLoss { missing: u8 },

    /// The watchdog forced the key to the safe (UP) state.
    WatchdogReleased,

    /// Relay-mode notifications.
    PeerJoined { callsign: String },
    PeerLeft { callsign: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_state_wire_round_trip() {
        for state in [KeyState::Up, KeyState::Down, KeyState::EndOfTransmission] {
            assert_eq!(KeyState::from_wire(state.to_wire()).unwrap(), state);
        }
    }

    #[test]
    fn bad_key_state_rejected() {
        for byte in [0x02u8, 0x7F, 0xFE] {
            assert!(matches!(
                KeyState::from_wire(byte),
                Err(Error::BadKeyState(b)) if b == byte
            ));
        }
    }

    #[test]
    fn eot_is_not_key_down() {
        let eot = Event {
            sequence: 9,
            state: KeyState::EndOfTransmission,
            duration_ms: 0,
            timestamp_ms: None,
        };
        assert!(eot.is_eot());
        assert!(!eot.key_down());
    }
}
