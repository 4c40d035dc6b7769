//! hanson-daemon: hardware front-end for a voice-assistant device
//!
//! Watches a push-button and starts one conversation session per press,
//! showing the session phase on a status indicator:
//! - GPIO through the character device or the legacy sysfs interface
//! - Debounced button watcher on a dedicated thread
//! - Indicator actor driving a pixel ring, a single LED, or nothing
//! - Manual (stdin) trigger mode when the button is unusable

mod button;
mod config;
mod controller;
mod events;
mod gpio;
mod indicator;
mod lifecycle;
mod session;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::button::{ButtonWatcher, WatcherHandle};
use crate::config::Config;
use crate::controller::{spawn_stdin_reader, Controller, Exit};
use crate::events::ButtonEvent;
use crate::gpio::access::{self, AccessReport};
use crate::gpio::HardwareContext;
use crate::indicator::StatusIndicator;
use crate::lifecycle::{teardown, ShutdownSignal};
use crate::session::CommandDriver;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(e) => debug!(error = %e, "no .env file loaded"),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "hanson-daemon starting");

    // Load configuration
    let config = Config::load()?;
    info!(
        button_pin = config.button.pin,
        led_pin = ?config.indicator.led_pin,
        ring = config.indicator.ring.is_some(),
        blink_ms = config.indicator.blink.as_millis() as u64,
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();
    shutdown
        .listen_for_signals()
        .context("failed to register signal handlers")?;

    let access = AccessReport::current();
    access.log_startup();

    let mut hw = match HardwareContext::open(&config.gpio_offsets(), config.sysfs_base) {
        Ok(hw) => Some(hw),
        Err(e) => {
            error!(error = %e, "GPIO hardware unavailable");
            access::log_remediation(None, &e, &access);
            None
        }
    };

    let device = indicator::select_device(&config.indicator, hw.as_mut());
    let indicator = StatusIndicator::spawn(device, config.indicator.blink);
    indicator.idle().await;

    // One slot: a press is either waiting to be handled or dropped
    let (press_tx, mut press_rx) = mpsc::channel(1);
    let watcher = match hw.as_mut() {
        Some(hw) => start_button(hw, &config, press_tx, &access),
        None => None,
    };

    let mut controller = Controller::new(
        CommandDriver::new(config.session.command.clone()),
        indicator.clone(),
        shutdown.clone(),
        config.session.cooldown,
    );

    let mut exit = Exit::ButtonLost;
    if watcher.is_some() {
        exit = controller.run_with_button(&mut press_rx).await;
    }

    if exit == Exit::ButtonLost && !shutdown.is_triggered() {
        warn!("button unavailable, falling back to manual mode");
        match spawn_stdin_reader() {
            Ok(mut lines) => {
                controller.run_manual(&mut lines).await;
            }
            Err(e) => error!(error = %e, "could not read stdin"),
        }
    }

    teardown(watcher, indicator, hw).await;

    info!(sessions = controller.sessions(), "hanson-daemon stopped");

    Ok(())
}

fn start_button(
    hw: &mut HardwareContext,
    config: &Config,
    press_tx: mpsc::Sender<ButtonEvent>,
    access: &AccessReport,
) -> Option<WatcherHandle> {
    let pin = config.button.pin;
    let (watcher, _level) = match ButtonWatcher::configure(hw, pin, config.button.debounce) {
        Ok(configured) => configured,
        Err(e) => {
            error!(pin, error = %e, "failed to configure button");
            access::log_remediation(Some(hw.kind()), &e, access);
            return None;
        }
    };

    match watcher.start(press_tx) {
        Ok(handle) => {
            info!("button watcher started");
            Some(handle)
        }
        Err(e) => {
            error!(error = %e, "failed to start button watcher");
            None
        }
    }
}
