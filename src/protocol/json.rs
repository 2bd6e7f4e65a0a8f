//! WebSocket-JSON variant for browser/relay interop.
//!
//! Carries the same semantic event as the binary framings plus the relay
//! control set. Room management itself (fan-out, peer bookkeeping) lives in
//! the relay, not here.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{Event, KeyState};

/// A peer as listed in `joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub callsign: String,
}

/// Everything that travels over the relay socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    CwEvent {
        callsign: String,
        key_down: bool,
        duration_ms: u16,
        timestamp_ms: u32,
        sequence: u8,
    },
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
        callsign: String,
    },
    Leave {},
    Joined {
        #[serde(rename = "peerId")]
        peer_id: String,
        peers: Vec<Peer>,
    },
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
        callsign: String,
    },
    PeerLeft {
        #[serde(rename = "peerId")]
        peer_id: String,
        callsign: String,
    },
    Keepalive {},
    KeepaliveAck {},
}

impl RelayMessage {
    /// Wrap a key transition for the relay. The JSON variant has no EOT
    /// state byte; EOT is a relay-level concern and is not representable
    /// here, so only UP/DOWN transitions should be passed.
    pub fn from_event(callsign: &str, event: &Event) -> Self {
        RelayMessage::CwEvent {
            callsign: callsign.to_string(),
            key_down: event.key_down(),
            duration_ms: event.duration_ms,
            timestamp_ms: event.timestamp_ms.unwrap_or(0),
            sequence: event.sequence,
        }
    }

    /// Extract the keying event, if this is one, with its sender callsign.
    pub fn to_event(&self) -> Option<(&str, Event)> {
        match self {
            RelayMessage::CwEvent {
                callsign,
                key_down,
                duration_ms,
                timestamp_ms,
                sequence,
            } => Some((
                callsign.as_str(),
                Event {
                    sequence: *sequence,
                    state: if *key_down { KeyState::Down } else { KeyState::Up },
                    duration_ms: *duration_ms,
                    timestamp_ms: Some(*timestamp_ms),
                },
            )),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cw_event_field_spelling() {
        let msg = RelayMessage::CwEvent {
            callsign: "DL1ABC".into(),
            key_down: true,
            duration_ms: 48,
            timestamp_ms: 1234,
            sequence: 17,
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "cw_event");
        assert_eq!(value["callsign"], "DL1ABC");
        assert_eq!(value["key_down"], true);
        assert_eq!(value["duration_ms"], 48);
        assert_eq!(value["timestamp_ms"], 1234);
        assert_eq!(value["sequence"], 17);
    }

    #[test]
    fn join_uses_room_id_camel_case() {
        let msg = RelayMessage::Join {
            room_id: "vband-1".into(),
            callsign: "DL1ABC".into(),
        };
        let text = msg.encode().unwrap();
        assert!(text.contains("\"roomId\":\"vband-1\""));
        assert_eq!(RelayMessage::decode(&text).unwrap(), msg);
    }

    #[test]
    fn joined_lists_peers() {
        let text = r#"{"type":"joined","peerId":"p1","peers":[{"peerId":"p2","callsign":"W1AW"}]}"#;
        let msg = RelayMessage::decode(text).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Joined {
                peer_id: "p1".into(),
                peers: vec![Peer {
                    peer_id: "p2".into(),
                    callsign: "W1AW".into(),
                }],
            }
        );
    }

    #[test]
    fn keepalive_round_trip() {
        for msg in [RelayMessage::Keepalive {}, RelayMessage::KeepaliveAck {}] {
            let text = msg.encode().unwrap();
            assert_eq!(RelayMessage::decode(&text).unwrap(), msg);
        }
    }

    #[test]
    fn event_conversion_round_trip() {
        let event = Event {
            sequence: 5,
            state: KeyState::Down,
            duration_ms: 96,
            timestamp_ms: Some(4800),
        };
        let msg = RelayMessage::from_event("W1AW", &event);
        let (callsign, back) = msg.to_event().unwrap();
        assert_eq!(callsign, "W1AW");
        assert_eq!(back, event);
    }

    #[test]
    fn control_messages_are_not_events() {
        assert!(RelayMessage::Keepalive {}.to_event().is_none());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(RelayMessage::decode("{\"type\":\"warp\"}").is_err());
        assert!(RelayMessage::decode("not json").is_err());
    }
}
