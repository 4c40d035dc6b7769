//! Process-wide owner of the open GPIO chip

use tracing::{debug, info, warn};

use super::line::{BackendKind, GpioChip, GpioError, GpioLine, LineRequest};
use super::probe;

/// Holds the single chip handle. Button and LED lines are requested from
/// it and handed back for release before the chip is closed.
pub struct HardwareContext {
    chip: Box<dyn GpioChip>,
    outstanding: usize,
}

impl HardwareContext {
    /// Probe the backends once and keep the winner for the process lifetime
    pub fn open(offsets: &[u32], sysfs_base: u32) -> Result<Self, GpioError> {
        let chip = probe::open_backend(offsets, sysfs_base)?;
        Ok(Self::with_chip(chip))
    }

    pub fn with_chip(chip: Box<dyn GpioChip>) -> Self {
        info!(backend = %chip.kind(), chip = chip.name(), "GPIO hardware context ready");
        Self {
            chip,
            outstanding: 0,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.chip.kind()
    }

    pub fn chip_name(&self) -> &str {
        self.chip.name()
    }

    pub fn request_line(&mut self, request: &LineRequest) -> Result<Box<dyn GpioLine>, GpioError> {
        let line = self.chip.request_line(request)?;
        self.outstanding += 1;
        debug!(
            offset = request.offset,
            consumer = request.consumer,
            outstanding = self.outstanding,
            "gpio line requested"
        );
        Ok(line)
    }

    /// Release a line obtained from this context. Failures are logged only.
    pub fn release_line(&mut self, line: Box<dyn GpioLine>, what: &str) {
        let offset = line.offset();
        self.outstanding = self.outstanding.saturating_sub(1);
        match line.release() {
            Ok(()) => debug!(offset, what, "gpio line released"),
            Err(e) => warn!(offset, what, error = %e, "could not release GPIO line"),
        }
    }

    #[cfg(test)]
    pub fn outstanding_lines(&self) -> usize {
        self.outstanding
    }

    /// Close the chip; any lines still out are reported but do not block it
    pub fn close(self) {
        if self.outstanding > 0 {
            warn!(outstanding = self.outstanding, "closing GPIO chip with lines still requested");
        }
        let name = self.chip.name().to_string();
        match self.chip.close() {
            Ok(()) => debug!(chip = %name, "gpio chip closed"),
            Err(e) => warn!(chip = %name, error = %e, "could not close GPIO chip"),
        }
    }
}
