//! Timing classifier and morse encoder/decoder
//!
//! All thresholds are multiples of the unit duration U (one dot):
//!
//! | interval | duration      | symbol         |
//! |----------|---------------|----------------|
//! | down     | `< 2U`        | `Dot`          |
//! | down     | `>= 2U`       | `Dash`         |
//! | up       | `< 2U`        | `ElementGap`   |
//! | up       | `2U ..= 5U`   | `CharacterGap` |
//! | up       | `> 5U`        | `WordGap`      |
//!
//! Ties at 2U resolve to `Dash` because hardware jitter tends to lengthen
//! presses rather than shorten them.

use std::time::Duration;

use tracing::{debug, warn};

use super::table;

/// Unit multiples used when keying output
const DOT_UNITS: u32 = 1;
const DASH_UNITS: u32 = 3;
const ELEMENT_GAP_UNITS: u32 = 1;
const CHARACTER_GAP_UNITS: u32 = 3;
const WORD_GAP_UNITS: u32 = 7;

/// Dots in the error prosign
const ERROR_PROSIGN_DOTS: usize = 8;

/// Whether the key was held or released during an interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Down,
    Up,
}

/// A single timed key-down or key-up span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInterval {
    pub duration: Duration,
    pub state: KeyState,
}

impl KeyInterval {
    pub fn down(duration: Duration) -> Self {
        Self {
            duration,
            state: KeyState::Down,
        }
    }

    pub fn up(duration: Duration) -> Self {
        Self {
            duration,
            state: KeyState::Up,
        }
    }
}

/// Discrete meaning of a classified interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorseSymbol {
    Dot,
    Dash,
    ElementGap,
    CharacterGap,
    WordGap,
}

/// A code that has no entry in the morse table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized morse code `{code}` at character {position}")]
pub struct MorseDecodeError {
    pub code: String,
    /// Index of the character among all characters attempted
    pub position: usize,
}

/// Result of decoding; bad characters are skipped, not fatal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub errors: Vec<MorseDecodeError>,
}

/// Accumulates codes into text while decoding
#[derive(Default)]
struct Decoder {
    decoded: Decoded,
    code: String,
    position: usize,
}

impl Decoder {
    fn push_code(&mut self, code: &str) {
        match table::decode_code(code) {
            Some(ch) => self.decoded.text.push(ch),
            None => {
                debug!(code, position = self.position, "skipping unknown morse code");
                self.decoded.errors.push(MorseDecodeError {
                    code: code.to_string(),
                    position: self.position,
                });
            }
        }
        self.position += 1;
    }

    fn flush(&mut self) {
        if self.code.is_empty() {
            return;
        }
        let code = std::mem::take(&mut self.code);
        self.push_code(&code);
    }

    fn word_break(&mut self) {
        self.flush();
        let text = &mut self.decoded.text;
        if !text.is_empty() && !text.ends_with(' ') {
            text.push(' ');
        }
    }

    fn finish(mut self) -> Decoded {
        self.flush();
        let trimmed = self.decoded.text.trim_end().len();
        self.decoded.text.truncate(trimmed);
        self.decoded
    }
}

/// Morse encoder/decoder bound to a unit duration
#[derive(Debug, Clone, Copy)]
pub struct MorseCodec {
    unit: Duration,
}

impl MorseCodec {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    /// Idle gap that ends a keyed morse message (twice a word gap)
    pub fn end_of_message_gap(&self) -> Duration {
        self.unit * WORD_GAP_UNITS * 2
    }

    /// Classify one interval against the unit thresholds
    pub fn classify(&self, interval: &KeyInterval) -> MorseSymbol {
        let units = |n: u32| self.unit * n;
        match interval.state {
            KeyState::Down if interval.duration < units(2) => MorseSymbol::Dot,
            KeyState::Down => MorseSymbol::Dash,
            KeyState::Up if interval.duration < units(2) => MorseSymbol::ElementGap,
            KeyState::Up if interval.duration <= units(5) => MorseSymbol::CharacterGap,
            KeyState::Up => MorseSymbol::WordGap,
        }
    }

    /// Decode an ordered sequence of key intervals into text
    pub fn decode(&self, intervals: &[KeyInterval]) -> Decoded {
        let mut decoder = Decoder::default();
        for interval in intervals {
            match self.classify(interval) {
                MorseSymbol::Dot => decoder.code.push('.'),
                MorseSymbol::Dash => decoder.code.push('-'),
                MorseSymbol::ElementGap => {}
                MorseSymbol::CharacterGap => decoder.flush(),
                MorseSymbol::WordGap => decoder.word_break(),
            }
        }
        decoder.finish()
    }

    /// Encode text into key intervals, dropping characters with no code
    pub fn encode(&self, text: &str) -> Vec<KeyInterval> {
        for dropped in text
            .chars()
            .filter(|c| !c.is_whitespace() && !table::is_supported(*c))
        {
            warn!(character = %dropped, "dropping character with no morse code");
        }

        let mut intervals = Vec::new();
        for (word_index, word) in normalize(text).split(' ').enumerate() {
            if word_index > 0 {
                intervals.push(KeyInterval::up(self.unit * WORD_GAP_UNITS));
            }
            for (char_index, ch) in word.chars().enumerate() {
                if char_index > 0 {
                    intervals.push(KeyInterval::up(self.unit * CHARACTER_GAP_UNITS));
                }
                let Some(code) = table::encode_char(ch) else {
                    continue;
                };
                for (symbol_index, symbol) in code.chars().enumerate() {
                    if symbol_index > 0 {
                        intervals.push(KeyInterval::up(self.unit * ELEMENT_GAP_UNITS));
                    }
                    let units = if symbol == '-' { DASH_UNITS } else { DOT_UNITS };
                    intervals.push(KeyInterval::down(self.unit * units));
                }
            }
        }
        intervals
    }

    /// The eight-dot error prosign
    pub fn error_pattern(&self) -> Vec<KeyInterval> {
        let mut intervals = Vec::with_capacity(ERROR_PROSIGN_DOTS * 2 - 1);
        for i in 0..ERROR_PROSIGN_DOTS {
            if i > 0 {
                intervals.push(KeyInterval::up(self.unit * ELEMENT_GAP_UNITS));
            }
            intervals.push(KeyInterval::down(self.unit * DOT_UNITS));
        }
        intervals
    }
}

/// Uppercase, drop unsupported characters, collapse whitespace
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| table::is_supported(*c))
                .map(|c| c.to_ascii_uppercase())
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render text as dot/dash notation: one space between characters, three between words
pub fn to_notation(text: &str) -> String {
    normalize(text)
        .split(' ')
        .map(|word| {
            word.chars()
                .filter_map(table::encode_char)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("   ")
}

/// Parse dot/dash notation produced by [`to_notation`]
pub fn from_notation(notation: &str) -> Decoded {
    let mut decoder = Decoder::default();
    for word in notation.trim().split("   ") {
        for code in word.split(' ').filter(|c| !c.is_empty()) {
            decoder.push_code(code);
        }
        decoder.word_break();
    }
    decoder.finish()
}
