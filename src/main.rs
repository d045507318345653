//! rune: push-to-talk session daemon for an offline voice/morse assistant
//!
//! The daemon runs on a single-board computer and provides:
//! - GPIO push-to-talk sampling with debouncing
//! - An explicit session state machine with barge-in and watchdogs
//! - Voice capture/playback over one exclusive audio channel
//! - Morse keying input and tone output on the same button
//!
//! Speech recognition, the language model and speech synthesis are local
//! engines driven as subprocesses. Nothing leaves the device.

mod audio;
mod button;
mod collaborators;
mod config;
mod error;
mod events;
mod lifecycle;
mod morse;
mod session;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audio::{AudioChannel, Notifier, StreamFormat};
use crate::button::{ButtonListener, Debouncer, SysfsLine};
use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::events::SessionEvent;
use crate::lifecycle::ShutdownSignal;
use crate::morse::{from_notation, to_notation};
use crate::session::{Input, SessionController};

/// Controller queue depth; device notices are dropped rather than block
const INPUT_QUEUE_DEPTH: usize = 64;

const EVENT_BUFFER: usize = 64;

/// Rune - offline push-to-talk voice and morse assistant
#[derive(Debug, Parser)]
#[command(name = "rune", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the session daemon until SIGINT/SIGTERM
    Run {
        /// Config file (falls back to $RUNE_CONFIG, then config/default.yml)
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Print session events to stdout as JSON lines
        #[arg(long)]
        events_json: bool,
    },
    /// Translate between text and dot/dash notation
    Morse {
        #[command(subcommand)]
        action: MorseAction,
    },
}

#[derive(Debug, Subcommand)]
enum MorseAction {
    /// Print the notation for TEXT
    Encode {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Print the text for NOTATION (one space between characters, three between words)
    Decode { notation: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let result = match cli.command {
        Command::Run {
            config,
            events_json,
        } => run(config.as_deref(), events_json).await,
        Command::Morse { action } => {
            println!("{}", translate(action));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: Option<&Path>, events_json: bool) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "rune starting");

    let config = Config::load(config_path)?;
    info!(
        path = %Config::resolve_path(config_path).display(),
        ptt_pin = config.ptt_pin,
        mode_policy = ?config.session.mode_policy,
        "configuration loaded"
    );

    // Hardware must be present before the session loop starts
    let line = SysfsLine::open(config.ptt_pin, config.button.active_low)
        .context("opening push-to-talk line")?;
    let format = StreamFormat {
        sample_rate: config.audio.sample_rate,
        channels: config.audio.channels,
    };
    let backend = audio::default_backend(&config.audio);
    backend.verify_devices(format).context("checking audio devices")?;

    let mut shutdown = ShutdownSignal::new().context("registering signal handlers")?;

    // Button sampler, audio callbacks and pipeline tasks -> session controller
    let (input_tx, input_rx) = mpsc::channel::<Input>(INPUT_QUEUE_DEPTH);
    // Session controller -> event publisher
    let (event_tx, _) = broadcast::channel::<SessionEvent>(EVENT_BUFFER);

    let notice_tx = input_tx.clone();
    let notifier: Notifier = Arc::new(move |notice| {
        if let Err(e) = notice_tx.try_send(Input::Channel(notice)) {
            warn!(error = %e, "dropped audio notice");
        }
    });
    let channel = AudioChannel::new(backend, format, config.session.max_duration, notifier);

    let mut controller = SessionController::new(
        &config,
        channel,
        Collaborators::from_config(&config.assistant),
        &input_tx,
        event_tx.clone(),
    );
    let mut event_rx = event_tx.subscribe();

    let listener = ButtonListener::new(input_tx);
    listener.start(
        Box::new(line),
        Debouncer::new(config.debounce_window()),
        config.button.poll_interval,
    )?;

    info!("daemon initialized, entering main loop");

    // The controller owns device streams, which are not Send, so it runs
    // on this task rather than being spawned
    tokio::select! {
        _ = controller.run(input_rx) => {
            info!("session controller exited");
        }
        _ = publish_events(&mut event_rx, events_json) => {
            info!("event publisher exited");
        }
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");
    listener.stop();
    info!(
        state = %controller.state(),
        sessions = controller.generation(),
        "rune stopped"
    );

    Ok(())
}

/// Encode or decode one morse message
fn translate(action: MorseAction) -> String {
    match action {
        MorseAction::Encode { text } => to_notation(&text.join(" ")),
        MorseAction::Decode { notation } => {
            let decoded = from_notation(&notation);
            for skipped in &decoded.errors {
                warn!(error = %skipped, "skipped morse character");
            }
            decoded.text
        }
    }
}

/// Log every session event, or print it as a JSON line
async fn publish_events(event_rx: &mut broadcast::Receiver<SessionEvent>, json: bool) {
    loop {
        match event_rx.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not serialize session event"),
            },
            Ok(event) => info!(%event, "session event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "session event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
