//! Key-state alternation check: DOWN and UP must alternate on a valid
//! stream. Violations are surfaced, never suppressed; the protocol is
//! best-effort and garbled events still play.

use tracing::warn;

use crate::event::Event;

/// Log the first violation, then every LOG_EVERY-th.
const LOG_EVERY: u64 = 64;

#[derive(Debug, Default)]
pub struct StateValidator {
    expected_key_down: Option<bool>,
    violations: u64,
}

impl StateValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check one event against the expected polarity. Returns `false` on a
    /// double-DOWN or double-UP; the caller still forwards the event. EOT
    /// clears the expectation and is never a violation.
    pub fn check(&mut self, event: &Event) -> bool {
        if event.is_eot() {
            self.expected_key_down = None;
            return true;
        }
        let down = event.key_down();
        let ok = match self.expected_key_down {
            None => true,
            Some(expected) => down == expected,
        };
        if !ok {
            self.violations += 1;
            if self.violations == 1 || self.violations % LOG_EVERY == 0 {
                warn!(
                    sequence = event.sequence,
                    key_down = down,
                    total = self.violations,
                    "key state alternation violated"
                );
            }
        }
        self.expected_key_down = Some(!down);
        ok
    }

    /// Total violations seen since construction.
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Accept either polarity next, e.g. after EOT or a timeline reset.
    pub fn reset(&mut self) {
        self.expected_key_down = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KeyState;

    fn ev(sequence: u8, state: KeyState) -> Event {
        Event {
            sequence,
            state,
            duration_ms: 0,
            timestamp_ms: None,
        }
    }

    #[test]
    fn alternating_stream_is_clean() {
        let mut v = StateValidator::new();
        for (i, state) in [KeyState::Down, KeyState::Up, KeyState::Down, KeyState::Up]
            .into_iter()
            .enumerate()
        {
            assert!(v.check(&ev(i as u8, state)));
        }
        assert_eq!(v.violations(), 0);
    }

    #[test]
    fn first_event_accepts_either_polarity() {
        let mut v = StateValidator::new();
        assert!(v.check(&ev(0, KeyState::Up)));
        let mut v = StateValidator::new();
        assert!(v.check(&ev(0, KeyState::Down)));
    }

    #[test]
    fn double_down_counts_exactly_one_error() {
        // DOWN, DOWN, UP, DOWN, UP: exactly one state error, no drops.
        let mut v = StateValidator::new();
        let states = [
            KeyState::Down,
            KeyState::Down,
            KeyState::Up,
            KeyState::Down,
            KeyState::Up,
        ];
        let results: Vec<bool> = states
            .into_iter()
            .enumerate()
            .map(|(i, s)| v.check(&ev(i as u8, s)))
            .collect();
        assert_eq!(results, [true, false, true, true, true]);
        assert_eq!(v.violations(), 1);
    }

    #[test]
    fn eot_resets_expectation() {
        let mut v = StateValidator::new();
        v.check(&ev(0, KeyState::Down));
        v.check(&ev(1, KeyState::EndOfTransmission));
        // A fresh transmission may start DOWN again without a violation.
        assert!(v.check(&ev(2, KeyState::Down)));
        assert_eq!(v.violations(), 0);
    }

    #[test]
    fn reset_clears_expectation() {
        let mut v = StateValidator::new();
        v.check(&ev(0, KeyState::Down));
        v.reset();
        assert!(v.check(&ev(1, KeyState::Down)));
        assert_eq!(v.violations(), 0);
    }
}
