//! ITU Morse table, text-to-element expansion, and an element decoder.
//!
//! The automated sender path expands text into the same (key_down, duration)
//! pairs a paddle operator produces, with 1/3/7-dit spacing. The decoder runs
//! the other way: it consumes dispatched key transitions and yields characters
//! for `on_decoded_char` wiring.

use crate::timing;

/// ITU Morse code for a character, as a dit/dah string.
pub fn code_for(c: char) -> Option<&'static str> {
    match c.to_ascii_uppercase() {
        'A' => Some(".-"),
        'B' => Some("-..."),
        'C' => Some("-.-."),
        'D' => Some("-.."),
        'E' => Some("."),
        'F' => Some("..-."),
        'G' => Some("--."),
        'H' => Some("...."),
        'I' => Some(".."),
        'J' => Some(".---"),
        'K' => Some("-.-"),
        'L' => Some(".-.."),
        'M' => Some("--"),
        'N' => Some("-."),
        'O' => Some("---"),
        'P' => Some(".--."),
        'Q' => Some("--.-"),
        'R' => Some(".-."),
        'S' => Some("..."),
        'T' => Some("-"),
        'U' => Some("..-"),
        'V' => Some("...-"),
        'W' => Some(".--"),
        'X' => Some("-..-"),
        'Y' => Some("-.--"),
        'Z' => Some("--.."),
        '0' => Some("-----"),
        '1' => Some(".----"),
        '2' => Some("..---"),
        '3' => Some("...--"),
        '4' => Some("....-"),
        '5' => Some("....."),
        '6' => Some("-...."),
        '7' => Some("--..."),
        '8' => Some("---.."),
        '9' => Some("----."),
        '.' => Some(".-.-.-"),
        ',' => Some("--..--"),
        '?' => Some("..--.."),
        '/' => Some("-..-."),
        '=' => Some("-...-"),
        '+' => Some(".-.-."),
        '-' => Some("-....-"),
        '@' => Some(".--.-."),
        _ => None,
    }
}

/// Reverse lookup: dit/dah string to character.
pub fn char_for(code: &str) -> Option<char> {
    const TABLE: &[(&str, char)] = &[
        (".-", 'A'),
        ("-...", 'B'),
        ("-.-.", 'C'),
        ("-..", 'D'),
        (".", 'E'),
        ("..-.", 'F'),
        ("--.", 'G'),
        ("....", 'H'),
        ("..", 'I'),
        (".---", 'J'),
        ("-.-", 'K'),
        (".-..", 'L'),
        ("--", 'M'),
        ("-.", 'N'),
        ("---", 'O'),
        (".--.", 'P'),
        ("--.-", 'Q'),
        (".-.", 'R'),
        ("...", 'S'),
        ("-", 'T'),
        ("..-", 'U'),
        ("...-", 'V'),
        (".--", 'W'),
        ("-..-", 'X'),
        ("-.--", 'Y'),
        ("--..", 'Z'),
        ("-----", '0'),
        (".----", '1'),
        ("..---", '2'),
        ("...--", '3'),
        ("....-", '4'),
        (".....", '5'),
        ("-....", '6'),
        ("--...", '7'),
        ("---..", '8'),
        ("----.", '9'),
        (".-.-.-", '.'),
        ("--..--", ','),
        ("..--..", '?'),
        ("-..-.", '/'),
        ("-...-", '='),
        (".-.-.", '+'),
        ("-....-", '-'),
        (".--.-.", '@'),
    ];
    TABLE.iter().find(|(c, _)| *c == code).map(|(_, ch)| *ch)
}

/// Expand text into a (key_down, state_duration_ms) element stream.
///
/// Output alternates DOWN/UP strictly: within a character elements are
/// separated by a 1-dit UP, characters by a 3-dit UP, words by a 7-dit UP.
/// Unknown characters are skipped. There is no trailing UP entry; the stream
/// ends on the final element.
pub fn text_to_elements(text: &str, wpm: u8) -> Vec<(bool, u16)> {
    let dit = timing::dit_ms(wpm) as u16;
    let dah = timing::dah_ms(wpm) as u16;
    let letter_gap = timing::letter_space_ms(wpm) as u16;
    let word_gap = timing::word_space_ms(wpm) as u16;

    let mut seq: Vec<(bool, u16)> = Vec::new();
    let words: Vec<&str> = text.split_whitespace().collect();

    for (wi, word) in words.iter().enumerate() {
        let codes: Vec<&str> = word.chars().filter_map(code_for).collect();
        for (ci, code) in codes.iter().enumerate() {
            for (ei, el) in code.chars().enumerate() {
                if ei > 0 {
                    seq.push((false, dit));
                }
                seq.push((true, if el == '-' { dah } else { dit }));
            }
            if ci + 1 < codes.len() {
                seq.push((false, letter_gap));
            }
        }
        if wi + 1 < words.len() && !codes.is_empty() {
            seq.push((false, word_gap));
        }
    }
    seq
}

/// Decodes key transitions back into characters.
///
/// Fed with the same (new_state, previous_state_duration) shape the wire
/// carries. Boundaries sit halfway between the nominal gaps: an element is a
/// dah at >= 2 dits, a letter break at >= 2 dits of UP, a word break at
/// >= 5 dits of UP.
#[derive(Debug)]
pub struct Decoder {
    dit_ms: u64,
    code: String,
    text: String,
}

impl Decoder {
    pub fn new(wpm: u8) -> Self {
        Self {
            dit_ms: timing::dit_ms(wpm),
            code: String::new(),
            text: String::new(),
        }
    }

    /// Feed one transition; `prev_ms` is how long the previous state lasted.
    /// Returns a newly completed character, if any.
    pub fn on_transition(&mut self, key_down: bool, prev_ms: u16) -> Option<char> {
        let prev = prev_ms as u64;
        if key_down {
            // A gap just ended.
            if prev >= 5 * self.dit_ms {
                let ch = self.flush();
                self.text.push(' ');
                ch
            } else if prev >= 2 * self.dit_ms {
                self.flush()
            } else {
                None
            }
        } else {
            // An element just ended.
            self.code.push(if prev >= 2 * self.dit_ms { '-' } else { '.' });
            None
        }
    }

    /// Flush the element accumulator, e.g. at end of transmission.
    pub fn finish(&mut self) -> Option<char> {
        self.flush()
    }

    pub fn decoded(&self) -> &str {
        &self.text
    }

    fn flush(&mut self) -> Option<char> {
        if self.code.is_empty() {
            return None;
        }
        let code = std::mem::take(&mut self.code);
        let ch = char_for(&code)?;
        self.text.push(ch);
        Some(ch)
    }
}
