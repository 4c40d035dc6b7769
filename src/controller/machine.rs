//! Session lifecycle driven by button presses

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::events::ButtonEvent;
use crate::indicator::StatusIndicator;
use crate::lifecycle::ShutdownSignal;
use crate::session::{PhaseHooks, Session, SessionDriver, SessionError};

/// Why a controller loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Shutdown,
    /// The button watcher stopped delivering presses
    ButtonLost,
    /// Manual input reached end of file
    InputClosed,
}

/// How one session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Failed,
    /// Ended early by a shutdown request
    Interrupted,
}

pub struct Controller<D: SessionDriver> {
    driver: D,
    indicator: StatusIndicator,
    shutdown: ShutdownSignal,
    cooldown: Duration,
    sessions: u64,
}

impl<D: SessionDriver> Controller<D> {
    pub fn new(
        driver: D,
        indicator: StatusIndicator,
        shutdown: ShutdownSignal,
        cooldown: Duration,
    ) -> Self {
        Self {
            driver,
            indicator,
            shutdown,
            cooldown,
            sessions: 0,
        }
    }

    /// Sessions started so far
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub(super) fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Run one session per press until shutdown or the watcher goes away
    pub async fn run_with_button(&mut self, presses: &mut mpsc::Receiver<ButtonEvent>) -> Exit {
        info!("ready, press the button to start a conversation");

        loop {
            let press = tokio::select! {
                biased;

                _ = self.shutdown.wait() => return Exit::Shutdown,
                press = presses.recv() => press,
            };

            let Some(press) = press else {
                warn!("button watcher stopped");
                return Exit::ButtonLost;
            };

            info!(pin = press.pin, "button pressed, starting conversation");
            self.run_session().await;

            // presses during the session or cooldown do not start another
            let mut dropped = 0;
            while presses.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                debug!(dropped, "ignored presses made during the session");
            }

            if self.shutdown.is_triggered() {
                return Exit::Shutdown;
            }
            info!("ready, press the button to start a conversation");
        }
    }

    /// Listening, run the session to its end, then Idle and cool down.
    /// Session failures are logged here and never propagate.
    pub async fn run_session(&mut self) -> SessionOutcome {
        self.sessions += 1;
        self.indicator.listening().await;

        let hooks = PhaseHooks::new(self.indicator.clone());
        let outcome = match self.driver.start(hooks).await {
            Ok(mut session) => {
                let ended = tokio::select! {
                    result = session.wait_for_end() => Some(result),
                    _ = self.shutdown.wait() => None,
                };

                match ended {
                    Some(Ok(conversation_id)) => {
                        info!(
                            conversation_id = conversation_id.as_deref().unwrap_or("unknown"),
                            "conversation ended"
                        );
                        SessionOutcome::Completed
                    }
                    Some(Err(e)) => {
                        log_session_error(&e);
                        SessionOutcome::Failed
                    }
                    None => {
                        info!("interrupted, ending conversation");
                        if let Err(e) = session.end().await {
                            warn!(error = %e, "could not end conversation cleanly");
                        }
                        SessionOutcome::Interrupted
                    }
                }
            }
            Err(e) => {
                log_session_error(&e);
                SessionOutcome::Failed
            }
        };

        self.indicator.idle().await;

        tokio::select! {
            _ = tokio::time::sleep(self.cooldown) => {}
            _ = self.shutdown.wait() => {}
        }

        outcome
    }
}

fn log_session_error(err: &SessionError) {
    error!(error = %err, "conversation failed");
    if err.is_authorization() {
        warn!("the agent rejected the request; check the session command's credentials and agent authorization settings");
    }
}
