//! Indicator actor
//!
//! A single task owns the output device and the blink timer. Transitions
//! and the timer's completion are handled one at a time from the same
//! loop, so a stale blink can never overwrite a newer state: every
//! transition clears the pending deadline before it touches the device.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::device::IndicatorDevice;
use super::state::{IndicatorState, Output};

/// Point-in-time view of the indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorSnapshot {
    pub state: IndicatorState,
    pub output: Output,
    pub blink_pending: bool,
    /// Times the blink timer has fired
    pub blink_completions: u64,
    pub write_failures: u64,
}

enum Command {
    Set {
        state: IndicatorState,
        done: Option<oneshot::Sender<()>>,
    },
    Snapshot(oneshot::Sender<IndicatorSnapshot>),
    Shutdown(oneshot::Sender<Box<dyn IndicatorDevice>>),
}

/// Handle to the indicator task. Cheap to clone.
#[derive(Clone)]
pub struct StatusIndicator {
    tx: mpsc::UnboundedSender<Command>,
}

impl StatusIndicator {
    /// Start the indicator task. `blink` of zero disables the Thinking blink.
    pub fn spawn(device: Box<dyn IndicatorDevice>, blink: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = IndicatorActor {
            device,
            blink,
            state: IndicatorState::Idle,
            output: Output::Off,
            blink_deadline: None,
            blink_completions: 0,
            write_failures: 0,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    pub async fn idle(&self) {
        self.set(IndicatorState::Idle).await
    }

    pub async fn listening(&self) {
        self.set(IndicatorState::Listening).await
    }

    pub async fn thinking(&self) {
        self.set(IndicatorState::Thinking).await
    }

    pub async fn speaking(&self) {
        self.set(IndicatorState::Speaking).await
    }

    /// Apply `state` and wait until the device has been written
    pub async fn set(&self, state: IndicatorState) {
        let (done, applied) = oneshot::channel();
        let cmd = Command::Set {
            state,
            done: Some(done),
        };
        if self.tx.send(cmd).is_err() {
            debug!(%state, "indicator stopped, transition dropped");
            return;
        }
        let _ = applied.await;
    }

    /// Queue `state` without waiting; usable from synchronous callbacks
    pub fn request(&self, state: IndicatorState) {
        if self.tx.send(Command::Set { state, done: None }).is_err() {
            debug!(%state, "indicator stopped, transition dropped");
        }
    }

    pub async fn snapshot(&self) -> Option<IndicatorSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    /// Cancel any blink, go Idle and stop the task, returning the device
    /// so its hardware can be released. `None` if already stopped.
    pub async fn shutdown(&self) -> Option<Box<dyn IndicatorDevice>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Shutdown(reply)).ok()?;
        rx.await.ok()
    }
}

struct IndicatorActor {
    device: Box<dyn IndicatorDevice>,
    blink: Duration,
    state: IndicatorState,
    output: Output,
    blink_deadline: Option<Instant>,
    blink_completions: u64,
    write_failures: u64,
}

impl IndicatorActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(device = self.device.name(), blink_ms = self.blink.as_millis() as u64, "indicator started");

        loop {
            let deadline = self.blink_deadline;
            let wake = deadline.unwrap_or_else(far_future);

            tokio::select! {
                // Commands win ties so a transition always cancels a due blink
                biased;

                cmd = rx.recv() => match cmd {
                    Some(Command::Set { state, done }) => {
                        self.transition(state);
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.transition(IndicatorState::Idle);
                        info!("indicator stopped");
                        let _ = reply.send(self.device);
                        return;
                    }
                    None => break,
                },

                _ = sleep_until(wake), if deadline.is_some() => {
                    self.complete_blink();
                }
            }
        }

        // Every handle is gone; leave the hardware dark
        self.transition(IndicatorState::Idle);
        info!("indicator stopped");
    }

    fn transition(&mut self, state: IndicatorState) {
        if self.blink_deadline.take().is_some() {
            debug!("blink timer cancelled");
        }

        let blink = state == IndicatorState::Thinking && !self.blink.is_zero();
        if state != self.state {
            debug!(from = %self.state, to = %state, "indicator transition");
        }
        self.state = state;
        self.apply(state.entry_output(blink));

        if blink {
            self.blink_deadline = Some(Instant::now() + self.blink);
        }
    }

    fn complete_blink(&mut self) {
        self.blink_deadline = None;
        self.blink_completions += 1;
        self.apply(Output::Thinking);
    }

    fn apply(&mut self, output: Output) {
        self.output = output;
        if let Err(e) = self.device.show(output) {
            self.write_failures += 1;
            warn!(device = self.device.name(), ?output, error = %e, "could not update indicator");
        }
    }

    fn snapshot(&self) -> IndicatorSnapshot {
        IndicatorSnapshot {
            state: self.state,
            output: self.output,
            blink_pending: self.blink_deadline.is_some(),
            blink_completions: self.blink_completions,
            write_failures: self.write_failures,
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::sim::SimBoard;
    use crate::gpio::{HardwareContext, Level, Polarity};
    use crate::indicator::device::recording::RecordingDevice;
    use crate::indicator::device::LedDevice;

    const BLINK: Duration = Duration::from_millis(50);

    fn spawn_recording(blink: Duration) -> (StatusIndicator, RecordingDevice) {
        let device = RecordingDevice::default();
        (StatusIndicator::spawn(Box::new(device.clone()), blink), device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cycle_leaves_no_timer() {
        let (indicator, device) = spawn_recording(BLINK);
        indicator.idle().await;
        indicator.listening().await;
        indicator.thinking().await;
        indicator.speaking().await;
        indicator.idle().await;

        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.state, IndicatorState::Idle);
        assert!(!snap.blink_pending);

        tokio::time::sleep(BLINK * 4).await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.output, Output::Off);
        assert_eq!(snap.blink_completions, 0);
        assert_eq!(
            device.shown(),
            vec![
                Output::Off,
                Output::Listening,
                Output::ThinkingBlink,
                Output::Speaking,
                Output::Off
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_settles_to_steady_thinking() {
        let (indicator, device) = spawn_recording(BLINK);
        indicator.thinking().await;
        assert!(indicator.snapshot().await.unwrap().blink_pending);

        tokio::time::sleep(BLINK + Duration::from_millis(10)).await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.state, IndicatorState::Thinking);
        assert_eq!(snap.output, Output::Thinking);
        assert!(!snap.blink_pending);
        assert_eq!(snap.blink_completions, 1);
        assert_eq!(device.shown(), vec![Output::ThinkingBlink, Output::Thinking]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_thinking_blinks_once() {
        let (indicator, _device) = spawn_recording(BLINK);
        indicator.thinking().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        indicator.thinking().await;

        tokio::time::sleep(BLINK * 3).await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.blink_completions, 1);
        assert_eq!(snap.output, Output::Thinking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_blink_is_steady_immediately() {
        let (indicator, device) = spawn_recording(Duration::ZERO);
        indicator.thinking().await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.output, Output::Thinking);
        assert!(!snap.blink_pending);
        assert_eq!(device.shown(), vec![Output::Thinking]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_state_not_overwritten_by_blink() {
        let (indicator, device) = spawn_recording(BLINK);
        indicator.thinking().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        indicator.speaking().await;

        tokio::time::sleep(BLINK * 3).await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.output, Output::Speaking);
        assert_eq!(snap.blink_completions, 0);
        assert_eq!(device.shown().last(), Some(&Output::Speaking));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_at_blink_deadline_wins() {
        let (indicator, device) = spawn_recording(BLINK);
        indicator.thinking().await;

        // Queued before the clock moves, so the actor sees the command
        // and the expired deadline in the same wakeup
        indicator.request(IndicatorState::Speaking);
        tokio::time::advance(BLINK).await;

        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.output, Output::Speaking);
        assert!(!snap.blink_pending);
        assert_eq!(snap.blink_completions, 0);
        assert_eq!(device.shown(), vec![Output::ThinkingBlink, Output::Speaking]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_at_exact_blink_stays_speaking() {
        let (indicator, device) = spawn_recording(BLINK);
        indicator.thinking().await;
        tokio::time::advance(BLINK).await;
        indicator.speaking().await;

        tokio::time::sleep(BLINK * 3).await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.output, Output::Speaking);
        assert!(!snap.blink_pending);
        assert_eq!(device.shown().last(), Some(&Output::Speaking));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_apply_in_order() {
        let (indicator, _device) = spawn_recording(BLINK);
        indicator.request(IndicatorState::Listening);
        indicator.request(IndicatorState::Thinking);
        indicator.request(IndicatorState::Speaking);
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.state, IndicatorState::Speaking);
        assert!(!snap.blink_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failures_are_contained() {
        let device = RecordingDevice {
            fail: true,
            ..Default::default()
        };
        let indicator = StatusIndicator::spawn(Box::new(device), BLINK);
        indicator.listening().await;
        indicator.speaking().await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.state, IndicatorState::Speaking);
        assert_eq!(snap.write_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_forces_idle_and_returns_device() {
        let (indicator, device) = spawn_recording(BLINK);
        indicator.thinking().await;
        let returned = indicator.shutdown().await;
        assert!(returned.is_some());
        assert_eq!(device.shown().last(), Some(&Output::Off));

        // later calls are harmless no-ops
        indicator.speaking().await;
        assert!(indicator.snapshot().await.is_none());
        assert!(indicator.shutdown().await.is_none());
        tokio::time::sleep(BLINK * 2).await;
        assert_eq!(device.shown().last(), Some(&Output::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpio_led_thinking_then_steady_on() {
        let board = SimBoard::new();
        let mut hw = HardwareContext::with_chip(board.chip());
        let led = LedDevice::open(&mut hw, 27, Polarity::ActiveHigh).unwrap();
        let indicator = StatusIndicator::spawn(Box::new(led), BLINK);

        indicator.thinking().await;
        assert_eq!(board.level(27), Level::Low);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let snap = indicator.snapshot().await.unwrap();
        assert_eq!(snap.output, Output::Thinking);
        assert!(!snap.blink_pending);
        assert_eq!(board.level(27), Level::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpio_led_active_low() {
        let board = SimBoard::new();
        let mut hw = HardwareContext::with_chip(board.chip());
        let led = LedDevice::open(&mut hw, 27, Polarity::ActiveLow).unwrap();
        let indicator = StatusIndicator::spawn(Box::new(led), BLINK);

        indicator.listening().await;
        assert_eq!(board.level(27), Level::Low);
        indicator.idle().await;
        assert_eq!(board.level(27), Level::High);
        assert_eq!(board.writes(27), vec![Level::Low, Level::High]);
    }
}
