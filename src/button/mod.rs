//! Push-to-talk button input
//!
//! A GPIO line is sampled on its own thread, debounced into press/release
//! events and handed to the session controller over its queue.

mod debounce;
mod line;
mod listener;

pub use debounce::{ButtonEvent, Debouncer, Edge};
pub use line::SysfsLine;
pub use listener::ButtonListener;
