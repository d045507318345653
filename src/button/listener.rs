//! Button sampling thread
//!
//! Polls the push-to-talk line at a fixed interval on a dedicated thread,
//! runs every sample through the debouncer and forwards accepted edges to
//! the session queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::session::Input;

use super::debounce::Debouncer;
use super::line::ButtonLine;

/// Samples the button line and feeds the session queue
pub struct ButtonListener {
    input_tx: mpsc::Sender<Input>,
    running: Arc<AtomicBool>,
}

impl ButtonListener {
    pub fn new(input_tx: mpsc::Sender<Input>) -> Self {
        Self {
            input_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the sampling thread
    ///
    /// The thread owns `line` and `debouncer` and runs until `stop()` is
    /// called or the session queue closes.
    pub fn start(
        &self,
        line: Box<dyn ButtonLine>,
        debouncer: Debouncer,
        poll_interval: Duration,
    ) -> Result<(), ButtonError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ButtonError::AlreadyRunning);
        }

        let input_tx = self.input_tx.clone();
        let running = Arc::clone(&self.running);

        let spawned = thread::Builder::new()
            .name("button-sampler".to_string())
            .spawn(move || {
                info!(
                    window_ms = debouncer.window().as_millis() as u64,
                    poll_us = poll_interval.as_micros() as u64,
                    "button sampler started"
                );
                run_sampling_loop(line, debouncer, poll_interval, &input_tx, &running);
                running.store(false, Ordering::SeqCst);
                info!("button sampler stopped");
            });

        if let Err(e) = spawned {
            self.running.store(false, Ordering::SeqCst);
            return Err(ButtonError::ThreadSpawn(e.to_string()));
        }
        Ok(())
    }

    /// Ask the sampling thread to exit after its current sample
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors from starting the sampler
#[derive(Debug, thiserror::Error)]
pub enum ButtonError {
    #[error("button sampler is already running")]
    AlreadyRunning,

    #[error("failed to spawn sampler thread: {0}")]
    ThreadSpawn(String),
}

fn run_sampling_loop(
    mut line: Box<dyn ButtonLine>,
    mut debouncer: Debouncer,
    poll_interval: Duration,
    input_tx: &mpsc::Sender<Input>,
    running: &AtomicBool,
) {
    // Read failures are logged once per outage, not once per sample
    let mut faulted = false;

    while running.load(Ordering::SeqCst) {
        match line.read_button_line() {
            Ok(pressed) => {
                if std::mem::take(&mut faulted) {
                    info!("button line readable again");
                }
                if let Some(event) = debouncer.observe(pressed, Instant::now()) {
                    debug!(edge = %event.edge, "button edge");
                    if input_tx.blocking_send(Input::Button(event)).is_err() {
                        warn!("session queue closed, stopping sampler");
                        break;
                    }
                }
            }
            Err(e) => {
                if !faulted {
                    error!(error = %e, "button line read failed");
                    faulted = true;
                }
            }
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::button::line::tests::SharedLine;
    use crate::button::Edge;

    fn start_listener() -> (ButtonListener, SharedLine, mpsc::Receiver<Input>) {
        let (tx, rx) = mpsc::channel(8);
        let listener = ButtonListener::new(tx);
        let line = SharedLine(Arc::new(AtomicBool::new(false)));
        listener
            .start(
                Box::new(line.clone()),
                Debouncer::new(Duration::from_millis(5)),
                Duration::from_millis(1),
            )
            .unwrap();
        (listener, line, rx)
    }

    async fn next_edge(rx: &mut mpsc::Receiver<Input>) -> Edge {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(Input::Button(event))) => event.edge,
            other => panic!("expected a button edge, got {other:?}"),
        }
    }

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel(8);
        let listener = ButtonListener::new(tx);
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_edges_forwarded() {
        let (listener, line, mut rx) = start_listener();
        assert!(listener.is_running());

        line.0.store(true, Ordering::SeqCst);
        assert_eq!(next_edge(&mut rx).await, Edge::Press);
        line.0.store(false, Ordering::SeqCst);
        assert_eq!(next_edge(&mut rx).await, Edge::Release);

        listener.stop();
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (listener, line, _rx) = start_listener();
        let err = listener
            .start(
                Box::new(line),
                Debouncer::new(Duration::from_millis(5)),
                Duration::from_millis(1),
            )
            .unwrap_err();
        assert!(matches!(err, ButtonError::AlreadyRunning));
        listener.stop();
    }
}
