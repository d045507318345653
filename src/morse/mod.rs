//! Morse module: timing classifier, codec and sidetone keyer
//!
//! The codec is a pure transform between text and [`KeyInterval`] sequences.
//! The keyer turns intervals into PCM so responses can be keyed through the
//! audio channel.

mod codec;
mod table;
mod tone;

pub use codec::{from_notation, to_notation, KeyInterval, MorseCodec};
pub use tone::ToneKeyer;
