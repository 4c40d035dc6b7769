//! Manual trigger mode
//!
//! Used when there is no usable button: each line read from stdin starts
//! one session. Stdin is read on its own thread so a blocked read never
//! holds up shutdown.

use std::io::{BufRead, Write};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::machine::{Controller, Exit};
use crate::session::SessionDriver;

const PROMPT: &str = "Start new session (Enter): ";

/// Forward stdin lines into a channel; it closes at end of input
pub fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(1);
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "could not read stdin");
                        break;
                    }
                }
            }
            debug!("stdin reader stopped");
        })?;
    Ok(rx)
}

impl<D: SessionDriver> Controller<D> {
    /// Run one session per input line until shutdown or end of input
    pub async fn run_manual(&mut self, lines: &mut mpsc::Receiver<String>) -> Exit {
        info!("manual mode: press Enter to start a conversation");

        loop {
            print!("{PROMPT}");
            let _ = std::io::stdout().flush();

            let line = tokio::select! {
                biased;

                _ = self.shutdown().wait() => return Exit::Shutdown,
                line = lines.recv() => line,
            };

            if line.is_none() {
                info!("input closed, leaving manual mode");
                return Exit::InputClosed;
            }

            self.run_session().await;
            if self.shutdown().is_triggered() {
                return Exit::Shutdown;
            }
        }
    }
}
