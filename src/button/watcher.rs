//! Button watcher
//!
//! Runs on a dedicated thread, blocking on short bounded GPIO waits so a
//! stop request is noticed within one wait interval. Presses are offered
//! to the controller through a one-slot channel; a press that finds the
//! slot full is dropped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::debounce::Debouncer;
use crate::events::ButtonEvent;
use crate::gpio::{EdgeKind, GpioError, GpioLine, HardwareContext, Level, LineRequest, Polarity};

/// Upper bound on one edge wait
pub const EDGE_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Sampling period when the line has no edge events
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Consecutive failed waits before the watcher gives up
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// How presses are detected on the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Block on kernel edge events
    EdgeEvents,
    /// Sample the level and detect transitions in software
    LevelPolling,
}

/// Errors starting the watcher
#[derive(Debug, thiserror::Error)]
pub enum ButtonError {
    #[error("failed to spawn watcher thread: {0}")]
    ThreadSpawn(String),
}

pub struct ButtonWatcher {
    line: Box<dyn GpioLine>,
    debouncer: Debouncer,
    strategy: Strategy,
    /// Last sampled state, for level polling
    was_pressed: bool,
}

impl ButtonWatcher {
    /// Claim `pin` as a pull-up, falling-edge input.
    ///
    /// Returns the watcher and the level seen at configuration time, which
    /// is only used for diagnostics.
    pub fn configure(
        hw: &mut HardwareContext,
        pin: u32,
        debounce: Duration,
    ) -> Result<(Self, Level), GpioError> {
        let line = hw.request_line(&LineRequest::button(pin))?;
        let (watcher, level) = match Self::from_line(line, debounce) {
            Ok(ok) => ok,
            Err((line, e)) => {
                hw.release_line(line, "button");
                return Err(e);
            }
        };

        info!(
            chip = hw.chip_name(),
            pin,
            strategy = ?watcher.strategy,
            "button initialized (pull-up), starting state: {}",
            if level == Level::Low { "PRESSED" } else { "released" }
        );
        Ok((watcher, level))
    }

    /// Wrap an already-requested line
    pub fn from_line(
        mut line: Box<dyn GpioLine>,
        debounce: Duration,
    ) -> Result<(Self, Level), (Box<dyn GpioLine>, GpioError)> {
        let level = match line.read() {
            Ok(level) => level,
            Err(e) => return Err((line, e)),
        };
        let strategy = if line.supports_edge_events() {
            Strategy::EdgeEvents
        } else {
            Strategy::LevelPolling
        };
        let was_pressed = line.polarity().is_active(level);

        Ok((
            Self {
                line,
                debouncer: Debouncer::new(debounce),
                strategy,
                was_pressed,
            },
            level,
        ))
    }

    #[cfg(test)]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn pin(&self) -> u32 {
        self.line.offset()
    }

    /// Wait for the next debounced press.
    ///
    /// Returns `Ok(None)` once `running` is cleared. Bounces inside the
    /// debounce window are swallowed here.
    pub fn poll_or_block(&mut self, running: &AtomicBool) -> Result<Option<ButtonEvent>, GpioError> {
        while running.load(Ordering::SeqCst) {
            if let Some(at) = self.wait_once()? {
                if self.debouncer.accept(at) {
                    return Ok(Some(ButtonEvent {
                        pin: self.line.offset(),
                        at,
                    }));
                }
                debug!(pin = self.line.offset(), "edge inside debounce window ignored");
            }
        }
        Ok(None)
    }

    /// One bounded wait; `Some(at)` when a press edge was seen
    fn wait_once(&mut self) -> Result<Option<Instant>, GpioError> {
        match self.strategy {
            Strategy::EdgeEvents => {
                let press_kind = match self.line.polarity() {
                    Polarity::ActiveLow => EdgeKind::Falling,
                    Polarity::ActiveHigh => EdgeKind::Rising,
                };
                Ok(self
                    .line
                    .wait_for_edge(EDGE_WAIT_TIMEOUT)?
                    .filter(|ev| ev.kind == press_kind)
                    .map(|ev| ev.at))
            }
            Strategy::LevelPolling => {
                let pressed = self.line.is_active()?;
                let edge = pressed && !self.was_pressed;
                self.was_pressed = pressed;
                if edge {
                    Ok(Some(Instant::now()))
                } else {
                    thread::sleep(POLL_INTERVAL);
                    Ok(None)
                }
            }
        }
    }

    /// Hand the line back without starting the thread
    pub fn into_line(self) -> Box<dyn GpioLine> {
        self.line
    }

    /// Start watching on a dedicated thread
    pub fn start(self, event_tx: mpsc::Sender<ButtonEvent>) -> Result<WatcherHandle, ButtonError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("button-watcher".to_string())
            .spawn(move || {
                info!("button watcher thread started");
                let line = run_watch_loop(self, event_tx, &thread_running);
                info!("button watcher thread stopped");
                line
            })
            .map_err(|e| ButtonError::ThreadSpawn(e.to_string()))?;

        Ok(WatcherHandle {
            running,
            thread: Some(thread),
        })
    }
}

fn run_watch_loop(
    mut watcher: ButtonWatcher,
    event_tx: mpsc::Sender<ButtonEvent>,
    running: &AtomicBool,
) -> Box<dyn GpioLine> {
    let mut errors = 0;

    while running.load(Ordering::SeqCst) {
        match watcher.poll_or_block(running) {
            Ok(Some(event)) => {
                errors = 0;
                match event_tx.try_send(event) {
                    Ok(()) => debug!(pin = event.pin, "button press"),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(pin = event.pin, "button press ignored, previous press not yet handled");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!("button event channel closed");
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                errors += 1;
                warn!(error = %e, errors, "error reading button");
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    error!(pin = watcher.pin(), "button keeps failing, giving up");
                    break;
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    // Mark stopped before the channel closes so observers see both
    running.store(false, Ordering::SeqCst);
    drop(event_tx);
    watcher.into_line()
}

/// Control handle for a running watcher thread
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Box<dyn GpioLine>>>,
}

impl WatcherHandle {
    /// Whether the watcher thread is still running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the thread and take back its line for release.
    ///
    /// Returns within one wait interval. `None` if the thread panicked.
    pub fn stop(mut self) -> Option<Box<dyn GpioLine>> {
        self.running.store(false, Ordering::SeqCst);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(line) => Some(line),
            Err(_) => {
                error!("button watcher thread panicked");
                None
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
