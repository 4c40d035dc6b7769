//! WS2812 pixel ring
//!
//! Every pixel shows the same colour; the phase is told apart by hue.
//! The strip driver is not `Send`, so it lives on its own thread and the
//! indicator talks to it over a channel.

use super::device::IndicatorError;
use super::state::Output;
use crate::config::RingConfig;

/// Pixel colour as (red, green, blue)
pub type Rgb = (u8, u8, u8);

pub const OFF: Rgb = (0, 0, 0);
pub const BLUE: Rgb = (0, 0, 255);
pub const YELLOW: Rgb = (255, 255, 0);
pub const DIM_YELLOW: Rgb = (64, 64, 0);
pub const GREEN: Rgb = (0, 255, 0);

pub fn colour(output: Output) -> Rgb {
    match output {
        Output::Off => OFF,
        Output::Listening => BLUE,
        Output::ThinkingBlink => DIM_YELLOW,
        Output::Thinking => YELLOW,
        Output::Speaking => GREEN,
    }
}

#[cfg(any(feature = "ring", test))]
mod worker {
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};

    use tracing::warn;

    use super::{colour, Rgb, OFF};
    use crate::gpio::GpioLine;
    use crate::indicator::device::{IndicatorDevice, IndicatorError};
    use crate::indicator::state::Output;

    /// A strip that paints every pixel one colour
    pub trait Strip {
        fn fill(&mut self, rgb: Rgb) -> Result<(), IndicatorError>;
    }

    struct Paint {
        rgb: Rgb,
        done: mpsc::SyncSender<Result<(), IndicatorError>>,
    }

    /// Handle to the thread that owns the strip
    pub struct RingDevice {
        tx: Option<mpsc::Sender<Paint>>,
        thread: Option<JoinHandle<()>>,
    }

    impl RingDevice {
        /// Start the ring thread and build the strip on it with `init`.
        /// Returns once the strip is up, or with the error that stopped it.
        pub fn spawn<S, F>(init: F) -> Result<Self, IndicatorError>
        where
            S: Strip,
            F: FnOnce() -> Result<S, IndicatorError> + Send + 'static,
        {
            let (tx, rx) = mpsc::channel::<Paint>();
            let (ready_tx, ready_rx) = mpsc::sync_channel(1);

            let thread = thread::Builder::new()
                .name("led-ring".to_string())
                .spawn(move || {
                    let mut strip = match init() {
                        Ok(strip) => {
                            let _ = ready_tx.send(Ok(()));
                            strip
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                    for paint in rx {
                        let _ = paint.done.send(strip.fill(paint.rgb));
                    }

                    // Sender dropped: blank before the driver goes away
                    if let Err(e) = strip.fill(OFF) {
                        warn!(error = %e, "could not blank LED ring");
                    }
                })
                .map_err(|e| IndicatorError::Ring(format!("could not start ring thread: {e}")))?;

            let ready = ready_rx
                .recv()
                .unwrap_or_else(|_| Err(IndicatorError::Ring("ring thread died during setup".into())));
            match ready {
                Ok(()) => Ok(Self {
                    tx: Some(tx),
                    thread: Some(thread),
                }),
                Err(e) => {
                    let _ = thread.join();
                    Err(e)
                }
            }
        }

        fn paint(&self, rgb: Rgb) -> Result<(), IndicatorError> {
            let stopped = || IndicatorError::Ring("ring thread stopped".into());
            let tx = self.tx.as_ref().ok_or_else(stopped)?;
            let (done, result) = mpsc::sync_channel(1);
            tx.send(Paint { rgb, done }).map_err(|_| stopped())?;
            result.recv().map_err(|_| stopped())?
        }
    }

    impl IndicatorDevice for RingDevice {
        fn name(&self) -> &'static str {
            "ws2812-ring"
        }

        fn show(&mut self, output: Output) -> Result<(), IndicatorError> {
            self.paint(colour(output))
        }

        fn release(self: Box<Self>) -> Option<Box<dyn GpioLine>> {
            drop(self);
            None
        }
    }

    impl Drop for RingDevice {
        fn drop(&mut self) {
            drop(self.tx.take());
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!("LED ring thread panicked");
                }
            }
        }
    }
}

#[cfg(any(feature = "ring", test))]
use worker::{RingDevice, Strip};

#[cfg(feature = "ring")]
mod ws281x {
    use rs_ws281x::{ChannelBuilder, Controller, ControllerBuilder, StripType};
    use tracing::info;

    use super::{IndicatorError, RingConfig, Rgb, Strip};

    const FREQ_HZ: u32 = 800_000;
    const DMA: i32 = 10;
    const CHANNEL: usize = 0;

    pub struct Ws281xStrip {
        controller: Controller,
    }

    impl Ws281xStrip {
        pub fn open(config: &RingConfig) -> Result<Self, IndicatorError> {
            let controller = ControllerBuilder::new()
                .freq(FREQ_HZ)
                .dma(DMA)
                .channel(
                    CHANNEL,
                    ChannelBuilder::new()
                        .pin(config.pin)
                        .count(config.count as i32)
                        .strip_type(StripType::Ws2812)
                        .brightness(config.brightness)
                        .build(),
                )
                .build()
                .map_err(|e| IndicatorError::Ring(format!("{e:?}")))?;

            info!(
                pixels = config.count,
                pin = config.pin,
                brightness = config.brightness,
                "LED ring initialized"
            );
            Ok(Self { controller })
        }
    }

    impl Strip for Ws281xStrip {
        fn fill(&mut self, (r, g, b): Rgb) -> Result<(), IndicatorError> {
            for led in self.controller.leds_mut(CHANNEL) {
                *led = [b, g, r, 0];
            }
            self.controller
                .render()
                .map_err(|e| IndicatorError::Ring(format!("{e:?}")))
        }
    }
}

/// Initialise the ring, or explain why it is unavailable
pub fn open(config: &RingConfig) -> Result<Box<dyn super::device::IndicatorDevice>, IndicatorError> {
    #[cfg(feature = "ring")]
    {
        let config = config.clone();
        Ok(Box::new(RingDevice::spawn(move || {
            ws281x::Ws281xStrip::open(&config)
        })?))
    }

    #[cfg(not(feature = "ring"))]
    {
        let _ = config;
        Err(IndicatorError::RingUnsupported)
    }
}
