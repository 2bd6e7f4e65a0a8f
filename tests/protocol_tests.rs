//! Protocol-level tests: wire framings, sequence accounting, alternation
//! tolerance, and the WebSocket-JSON variant.

use cwlink::protocol::{DatagramCodec, RelayMessage, StreamCodec};
use cwlink::{Arrival, Event, KeyState, SequenceTracker, StateValidator};

fn ev(sequence: u8, state: KeyState, duration_ms: u16, timestamp_ms: Option<u32>) -> Event {
    Event {
        sequence,
        state,
        duration_ms,
        timestamp_ms,
    }
}

#[test]
fn datagram_wire_layout() {
    let codec = DatagramCodec::new();

    // DOWN, sequence 9, 48 ms of preceding silence.
    let bytes = codec.encode(&ev(9, KeyState::Down, 48, None)).unwrap();
    assert_eq!(bytes, [9, 0x01, 48]);

    // UP with the element length.
    let bytes = codec.encode(&ev(10, KeyState::Up, 144, None)).unwrap();
    assert_eq!(bytes, [10, 0x00, 144]);

    // EOT carries duration 0.
    let bytes = codec
        .encode(&ev(11, KeyState::EndOfTransmission, 0, None))
        .unwrap();
    assert_eq!(bytes, [11, 0xFF, 0]);
}

#[test]
fn codec_round_trip_every_event_shape() {
    // decode(encode(e)) == e across framings, states, and duration widths.
    let durations = [0u16, 1, 47, 48, 144, 255, 256, 381, 65535];
    let states = [KeyState::Up, KeyState::Down, KeyState::EndOfTransmission];

    let extended = DatagramCodec::extended();
    for state in states {
        for duration in durations {
            let event = ev(77, state, duration, None);
            let (decoded, _) = extended.decode(&extended.encode(&event).unwrap()).unwrap();
            assert_eq!(decoded, event);
        }
    }

    for timestamped in [false, true] {
        let mut codec = StreamCodec::new(timestamped);
        for state in states {
            for duration in durations {
                let event = ev(77, state, duration, timestamped.then_some(123_456));
                codec.feed(&codec.encode(&event));
                assert_eq!(codec.next_event().unwrap(), Some(event));
            }
        }
    }
}

#[test]
fn compact_datagram_duration_cap() {
    let codec = DatagramCodec::new();
    assert!(codec.encode(&ev(0, KeyState::Up, 255, None)).is_ok());
    assert!(codec.encode(&ev(0, KeyState::Up, 256, None)).is_err());
}

#[test]
fn stream_decoder_survives_fragmentation() {
    // Three events split at every awkward boundary still decode intact.
    let tx = StreamCodec::new(true);
    let mut wire = Vec::new();
    wire.extend(tx.encode(&ev(0, KeyState::Down, 0, Some(0))));
    wire.extend(tx.encode(&ev(1, KeyState::Up, 300, Some(48))));
    wire.extend(tx.encode(&ev(2, KeyState::EndOfTransmission, 0, Some(348))));

    for chunk in [1usize, 2, 3, 5, wire.len()] {
        let mut rx = StreamCodec::new(true);
        let mut events = Vec::new();
        for part in wire.chunks(chunk) {
            rx.feed(part);
            while let Some(event) = rx.next_event().unwrap() {
                events.push(event);
            }
        }
        assert_eq!(events.len(), 3, "chunk size {chunk}");
        assert_eq!(events[1].duration_ms, 300);
        assert_eq!(events[2].state, KeyState::EndOfTransmission);
        assert_eq!(rx.pending(), 0);
    }
}

#[test]
fn sequence_wrap_is_loss_free() {
    // 300 events, sequences 0..=255 then 0..=43: zero Lost reports.
    let mut tracker = SequenceTracker::new();
    let mut lost = 0u32;
    for n in 0..300u32 {
        if let Arrival::Lost(_) = tracker.observe((n % 256) as u8) {
            lost += 1;
        }
    }
    assert_eq!(lost, 0);
}

#[test]
fn alternation_tolerance() {
    // DOWN, DOWN, UP, DOWN, UP: exactly one state error, nothing dropped.
    let mut validator = StateValidator::new();
    let states = [
        KeyState::Down,
        KeyState::Down,
        KeyState::Up,
        KeyState::Down,
        KeyState::Up,
    ];
    let mut errors = 0;
    for (i, state) in states.into_iter().enumerate() {
        if !validator.check(&ev(i as u8, state, 0, None)) {
            errors += 1;
        }
    }
    assert_eq!(errors, 1);
    assert_eq!(validator.violations(), 1);
}

#[test]
fn json_event_matches_browser_shape() {
    let event = ev(3, KeyState::Down, 48, Some(96));
    let msg = RelayMessage::from_event("DL1ABC", &event);
    let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

    assert_eq!(value["type"], "cw_event");
    assert_eq!(value["callsign"], "DL1ABC");
    assert_eq!(value["key_down"], true);
    assert_eq!(value["duration_ms"], 48);
    assert_eq!(value["timestamp_ms"], 96);
    assert_eq!(value["sequence"], 3);

    let (callsign, back) = RelayMessage::decode(&msg.encode().unwrap())
        .unwrap()
        .to_event()
        .map(|(c, e)| (c.to_string(), e))
        .unwrap();
    assert_eq!(callsign, "DL1ABC");
    assert_eq!(back, event);
}

#[test]
fn json_relay_control_round_trip() {
    let messages = vec![
        RelayMessage::Join {
            room_id: "room-7".into(),
            callsign: "DL1ABC".into(),
        },
        RelayMessage::Leave {},
        RelayMessage::PeerJoined {
            peer_id: "p9".into(),
            callsign: "W1AW".into(),
        },
        RelayMessage::PeerLeft {
            peer_id: "p9".into(),
            callsign: "W1AW".into(),
        },
        RelayMessage::Keepalive {},
        RelayMessage::KeepaliveAck {},
    ];
    for msg in messages {
        let text = msg.encode().unwrap();
        assert_eq!(RelayMessage::decode(&text).unwrap(), msg);
    }
}
