//! Ordered release of everything acquired at startup
//!
//! Order: stop the button thread, stop the indicator (which cancels any
//! blink and leaves the output dark), release the lines, close the chip.
//! Failures at any step are logged and the remaining steps still run.

use tracing::{info, warn};

use crate::button::WatcherHandle;
use crate::gpio::HardwareContext;
use crate::indicator::StatusIndicator;

pub async fn teardown(
    watcher: Option<WatcherHandle>,
    indicator: StatusIndicator,
    hw: Option<HardwareContext>,
) {
    info!("shutting down...");

    let button_line = match watcher {
        // joining waits out at most one bounded GPIO wait
        Some(handle) => match tokio::task::spawn_blocking(move || handle.stop()).await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "could not stop button watcher");
                None
            }
        },
        None => None,
    };

    let device = indicator.shutdown().await;
    let indicator_line = device.and_then(|device| device.release());

    let Some(mut hw) = hw else {
        return;
    };
    if let Some(line) = button_line {
        hw.release_line(line, "button");
    }
    if let Some(line) = indicator_line {
        hw.release_line(line, "status LED");
    }
    hw.close();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::button::ButtonWatcher;
    use crate::gpio::sim::SimBoard;
    use crate::gpio::{Level, Polarity};
    use crate::indicator::LedDevice;

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let board = SimBoard::new();
        let mut hw = HardwareContext::with_chip(board.chip());

        let led = LedDevice::open(&mut hw, 27, Polarity::ActiveHigh).unwrap();
        let indicator = StatusIndicator::spawn(Box::new(led), Duration::from_millis(50));
        indicator.thinking().await;

        let (watcher, _) = ButtonWatcher::configure(&mut hw, 17, Duration::from_millis(300)).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let handle = watcher.start(tx).unwrap();

        teardown(Some(handle), indicator, Some(hw)).await;

        assert!(!board.is_claimed(17));
        assert!(!board.is_claimed(27));
        assert!(board.is_closed());
        assert_eq!(board.writes(27).last(), Some(&Level::Low));
    }

    #[tokio::test]
    async fn test_release_failure_does_not_stop_teardown() {
        let board = SimBoard::new();
        board.fail_release(17);
        let mut hw = HardwareContext::with_chip(board.chip());

        let led = LedDevice::open(&mut hw, 27, Polarity::ActiveLow).unwrap();
        let indicator = StatusIndicator::spawn(Box::new(led), Duration::ZERO);
        let (watcher, _) = ButtonWatcher::configure(&mut hw, 17, Duration::from_millis(300)).unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let handle = watcher.start(tx).unwrap();

        teardown(Some(handle), indicator, Some(hw)).await;

        assert!(!board.is_claimed(27));
        assert!(board.is_closed());
    }

    #[tokio::test]
    async fn test_teardown_without_hardware() {
        let indicator = StatusIndicator::spawn(Box::new(crate::indicator::NoopDevice), Duration::ZERO);
        teardown(None, indicator.clone(), None).await;
        assert!(indicator.snapshot().await.is_none());
    }
}
