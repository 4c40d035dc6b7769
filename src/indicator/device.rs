//! Output devices for the status indicator

use tracing::info;

use super::state::Output;
use crate::gpio::{GpioError, GpioLine, HardwareContext, LineRequest, Polarity};

/// Errors from indicator hardware
#[derive(Debug, thiserror::Error)]
pub enum IndicatorError {
    #[error("LED GPIO error: {0}")]
    Gpio(#[from] GpioError),

    #[error("LED ring error: {0}")]
    Ring(String),

    #[error("LED ring support is not compiled in (build with the `ring` feature)")]
    RingUnsupported,
}

/// Something that can display an [`Output`]
pub trait IndicatorDevice: Send {
    fn name(&self) -> &'static str;

    fn show(&mut self, output: Output) -> Result<(), IndicatorError>;

    /// Give up the hardware. A GPIO line, if any, is handed back so the
    /// hardware context can release it.
    fn release(self: Box<Self>) -> Option<Box<dyn GpioLine>>;
}

/// Single LED on a GPIO output line
pub struct LedDevice {
    line: Box<dyn GpioLine>,
}

impl LedDevice {
    pub fn open(hw: &mut HardwareContext, pin: u32, polarity: Polarity) -> Result<Self, GpioError> {
        let line = hw.request_line(&LineRequest::led(pin, polarity))?;
        info!(
            chip = hw.chip_name(),
            pin,
            "status LED ready (active {})",
            match polarity {
                Polarity::ActiveHigh => "HIGH",
                Polarity::ActiveLow => "LOW",
            }
        );
        Ok(Self { line })
    }
}

impl IndicatorDevice for LedDevice {
    fn name(&self) -> &'static str {
        "gpio-led"
    }

    fn show(&mut self, output: Output) -> Result<(), IndicatorError> {
        self.line.set_active(output.is_lit())?;
        Ok(())
    }

    fn release(self: Box<Self>) -> Option<Box<dyn GpioLine>> {
        Some(self.line)
    }
}

/// Used when no indicator hardware is available
pub struct NoopDevice;

impl IndicatorDevice for NoopDevice {
    fn name(&self) -> &'static str {
        "none"
    }

    fn show(&mut self, output: Output) -> Result<(), IndicatorError> {
        tracing::debug!(?output, "indicator (no device)");
        Ok(())
    }

    fn release(self: Box<Self>) -> Option<Box<dyn GpioLine>> {
        None
    }
}
