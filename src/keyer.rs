//! Iambic keyer state machine.
//!
//! Pure logic over a millisecond timeline: the driver samples the paddles,
//! calls `tick`, and sleeps to `next_wake_ms`. Ticking finer than an element
//! (>= 500 Hz) is what lets Mode-B squeeze memory observe the opposite
//! paddle *during* an element.
//!
//! Character and word spaces are not synthesized here; they emerge from
//! operator idle time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::timing;

/// Iambic discipline.
///
/// Mode B samples the opposite paddle during element emission and latches a
/// one-shot memory; Mode A decides purely from the paddle state at element
/// end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IambicMode {
    A,
    #[default]
    B,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyerConfig {
    pub wpm: u8,
    pub mode: IambicMode,
    /// Swap dit and dah paddles (left-handed operation).
    pub swap_paddles: bool,
}

impl Default for KeyerConfig {
    fn default() -> Self {
        Self {
            wpm: 20,
            mode: IambicMode::B,
            swap_paddles: false,
        }
    }
}

impl KeyerConfig {
    pub fn with_wpm(wpm: u8) -> Self {
        Self {
            wpm,
            ..Default::default()
        }
    }

    fn element_ms(&self, element: Element) -> u64 {
        match element {
            Element::Dit => timing::dit_ms(self.wpm),
            Element::Dah => timing::dah_ms(self.wpm),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Dit,
    Dah,
}

impl Element {
    fn opposite(self) -> Self {
        match self {
            Element::Dit => Element::Dah,
            Element::Dah => Element::Dit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Key down, emitting `element` until `end_ms`.
    Keying { element: Element, end_ms: u64 },
    /// Key up for the 1-dit element space, until `end_ms`.
    Gap { end_ms: u64 },
}

/// A key-line transition at a point on the keyer's timeline.
///
/// `at_ms` is the scheduled transition time, which may be slightly earlier
/// than the tick that produced it; drivers use it for exact pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub key_down: bool,
    pub at_ms: u64,
}

#[derive(Debug)]
pub struct IambicKeyer {
    cfg: KeyerConfig,
    state: State,
    last_element: Element,
    /// Mode-B one-shot: the opposite paddle was seen during the current
    /// element.
    opposite_memory: bool,
}

impl IambicKeyer {
    pub fn new(cfg: KeyerConfig) -> Self {
        Self {
            cfg,
            state: State::Idle,
            // Dah, so that an initial squeeze leads with a dit.
            last_element: Element::Dah,
            opposite_memory: false,
        }
    }

    pub fn config(&self) -> &KeyerConfig {
        &self.cfg
    }

    /// Change speed/mode. Takes effect from the next element.
    pub fn set_config(&mut self, cfg: KeyerConfig) {
        self.cfg = cfg;
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn is_key_down(&self) -> bool {
        matches!(self.state, State::Keying { .. })
    }

    /// The next timeline point at which the state machine will act, or
    /// `None` when idle (the driver polls at its sampling rate).
    pub fn next_wake_ms(&self) -> Option<u64> {
        match self.state {
            State::Idle => None,
            State::Keying { end_ms, .. } | State::Gap { end_ms } => Some(end_ms),
        }
    }

    /// Advance the machine to `now_ms` with the current paddle sample.
    /// Returns at most one key transition per call; drivers tick often
    /// enough that this never lags.
    pub fn tick(&mut self, now_ms: u64, dit: bool, dah: bool) -> Option<KeyTransition> {
        let (dit, dah) = if self.cfg.swap_paddles {
            (dah, dit)
        } else {
            (dit, dah)
        };

        match self.state {
            State::Idle => {
                // Dit wins a simultaneous press from idle.
                let next = if dit {
                    Some(Element::Dit)
                } else if dah {
                    Some(Element::Dah)
                } else {
                    None
                };
                next.map(|element| self.start_element(element, now_ms))
            }
            State::Keying { element, end_ms } => {
                if self.cfg.mode == IambicMode::B {
                    let opposite_pressed = match element {
                        Element::Dit => dah,
                        Element::Dah => dit,
                    };
                    if opposite_pressed {
                        self.opposite_memory = true;
                    }
                }
                if now_ms >= end_ms {
                    self.last_element = element;
                    self.state = State::Gap {
                        end_ms: end_ms + timing::element_space_ms(self.cfg.wpm),
                    };
                    return Some(KeyTransition {
                        key_down: false,
                        at_ms: end_ms,
                    });
                }
                None
            }
            State::Gap { end_ms } => {
                if now_ms < end_ms {
                    return None;
                }
                let memory = std::mem::take(&mut self.opposite_memory);
                let next = if memory {
                    Some(self.last_element.opposite())
                } else if dit && dah {
                    Some(self.last_element.opposite())
                } else if dit {
                    Some(Element::Dit)
                } else if dah {
                    Some(Element::Dah)
                } else {
                    None
                };
                match next {
                    Some(element) => Some(self.start_element(element, end_ms)),
                    None => {
                        self.state = State::Idle;
                        None
                    }
                }
            }
        }
    }

    /// Abandon any element in progress.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.opposite_memory = false;
    }

    fn start_element(&mut self, element: Element, at_ms: u64) -> KeyTransition {
        self.state = State::Keying {
            element,
            end_ms: at_ms + self.cfg.element_ms(element),
        };
        self.opposite_memory = false;
        KeyTransition {
            key_down: true,
            at_ms,
        }
    }
}

/// Debounced paddle latch written by an external sampler (>= 500 Hz, with
/// >= 500 us debounce applied by the sampler) and read by the keyer driver.
#[derive(Debug, Clone, Default)]
pub struct PaddleInput {
    dit: Arc<AtomicBool>,
    dah: Arc<AtomicBool>,
}

impl PaddleInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dit(&self, pressed: bool) {
        self.dit.store(pressed, Ordering::Relaxed);
    }

    pub fn set_dah(&self, pressed: bool) {
        self.dah.store(pressed, Ordering::Relaxed);
    }

    pub fn set(&self, dit: bool, dah: bool) {
        self.set_dit(dit);
        self.set_dah(dah);
    }

    pub fn dit(&self) -> bool {
        self.dit.load(Ordering::Relaxed)
    }

    pub fn dah(&self) -> bool {
        self.dah.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the keyer with a fixed paddle state from `from_ms` to `to_ms`
    /// at a 1 ms tick, collecting transitions.
    fn run(
        keyer: &mut IambicKeyer,
        from_ms: u64,
        to_ms: u64,
        dit: bool,
        dah: bool,
    ) -> Vec<KeyTransition> {
        let mut out = Vec::new();
        for now in from_ms..=to_ms {
            if let Some(t) = keyer.tick(now, dit, dah) {
                out.push(t);
            }
        }
        out
    }

    /// Collapse transitions into (key_down, state_duration) pairs.
    fn durations(transitions: &[KeyTransition]) -> Vec<(bool, u64)> {
        transitions
            .windows(2)
            .map(|w| (w[0].key_down, w[1].at_ms - w[0].at_ms))
            .collect()
    }

    #[test]
    fn single_dit() {
        // 25 WPM: dit 48 ms.
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        let mut t = run(&mut keyer, 0, 40, true, false);
        t.extend(run(&mut keyer, 41, 200, false, false));
        assert_eq!(
            t,
            vec![
                KeyTransition { key_down: true, at_ms: 0 },
                KeyTransition { key_down: false, at_ms: 48 },
            ]
        );
        assert!(keyer.is_idle());
    }

    #[test]
    fn held_dit_repeats() {
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        let t = run(&mut keyer, 0, 250, true, false);
        // dit, space, dit, space, dit...
        assert_eq!(
            t.iter().map(|t| t.at_ms).collect::<Vec<_>>(),
            vec![0, 48, 96, 144, 192, 240]
        );
    }

    #[test]
    fn mode_b_squeeze_alternates() {
        // Hold both paddles: dit/48 up/48 dah/144 up/48 dit/48 ... at 25 WPM.
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        let t = run(&mut keyer, 0, 620, true, true);
        assert_eq!(
            durations(&t),
            vec![
                (true, 48),
                (false, 48),
                (true, 144),
                (false, 48),
                (true, 48),
                (false, 48),
                (true, 144),
                (false, 48),
            ]
        );
    }

    #[test]
    fn mode_b_release_plays_memorized_element() {
        // Squeeze from idle, release both mid-dit: the dah memorized during
        // the dit still plays.
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        let mut t = run(&mut keyer, 0, 20, true, true);
        t.extend(run(&mut keyer, 21, 400, false, false));
        assert_eq!(
            durations(&t),
            vec![(true, 48), (false, 48), (true, 144)]
        );
        assert!(keyer.is_idle());
    }

    #[test]
    fn mode_a_release_falls_idle() {
        // Same input in Mode A: after the current dit completes the keyer
        // returns to idle instead of continuing to dah.
        let cfg = KeyerConfig {
            wpm: 25,
            mode: IambicMode::A,
            swap_paddles: false,
        };
        let mut keyer = IambicKeyer::new(cfg);
        let mut t = run(&mut keyer, 0, 20, true, true);
        t.extend(run(&mut keyer, 21, 400, false, false));
        assert_eq!(
            t,
            vec![
                KeyTransition { key_down: true, at_ms: 0 },
                KeyTransition { key_down: false, at_ms: 48 },
            ]
        );
        assert!(keyer.is_idle());
    }

    #[test]
    fn mode_a_held_squeeze_still_alternates() {
        let cfg = KeyerConfig {
            wpm: 25,
            mode: IambicMode::A,
            swap_paddles: false,
        };
        let mut keyer = IambicKeyer::new(cfg);
        let t = run(&mut keyer, 0, 430, true, true);
        assert_eq!(
            durations(&t)[..4],
            [(true, 48), (false, 48), (true, 144), (false, 48)]
        );
    }

    #[test]
    fn dah_tap_during_dit_is_memorized() {
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        // Start a held dit, tap dah at 10-12 ms only.
        let mut t = run(&mut keyer, 0, 9, true, false);
        t.extend(run(&mut keyer, 10, 12, true, true));
        t.extend(run(&mut keyer, 13, 96, true, false));
        // At gap end the memorized dah wins over the held dit.
        let next = t.last().copied();
        assert_eq!(
            next,
            Some(KeyTransition { key_down: true, at_ms: 96 })
        );
        assert!(matches!(
            keyer.state,
            State::Keying { element: Element::Dah, .. }
        ));
    }

    #[test]
    fn swap_paddles() {
        let cfg = KeyerConfig {
            wpm: 25,
            swap_paddles: true,
            ..Default::default()
        };
        let mut keyer = IambicKeyer::new(cfg);
        // Physical dit paddle now sends dah.
        let t = run(&mut keyer, 0, 200, true, false);
        assert_eq!(durations(&t), vec![(true, 144), (false, 48)]);
    }

    #[test]
    fn idle_simultaneous_press_leads_with_dit() {
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        keyer.tick(0, true, true);
        assert!(matches!(
            keyer.state,
            State::Keying { element: Element::Dit, .. }
        ));
    }

    #[test]
    fn wake_times_track_element_ends() {
        let mut keyer = IambicKeyer::new(KeyerConfig::with_wpm(25));
        assert_eq!(keyer.next_wake_ms(), None);
        keyer.tick(0, false, true);
        assert_eq!(keyer.next_wake_ms(), Some(144));
        keyer.tick(144, false, false);
        assert_eq!(keyer.next_wake_ms(), Some(192));
    }
}
