//! Session control
//!
//! One controller owns the session state and the audio channel. Everything
//! else talks to it through a single ordered queue of [`Input`]s:
//! - button edges from the sampling thread
//! - capture/playback notices from audio device callbacks
//! - pipeline results tagged with the generation that requested them

mod controller;
mod pipeline;
mod state;

pub use controller::SessionController;
pub use state::{Mode, SessionState};

use crate::audio::ChannelNotice;
use crate::button::ButtonEvent;

use pipeline::Outcome;

/// Messages consumed by the session controller
#[derive(Debug)]
pub enum Input {
    Button(ButtonEvent),
    Channel(ChannelNotice),
    /// A pipeline run finished; stale generations are dropped
    Completed { generation: u64, outcome: Outcome },
}
