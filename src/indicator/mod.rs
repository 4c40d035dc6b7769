//! Status indicator
//!
//! Shows the session phase on whichever output is available, tried in
//! order: pixel ring, single GPIO LED, nothing. A failed tier falls
//! through to the next one.

mod actor;
pub(crate) mod device;
mod ring;
mod state;

pub use actor::{IndicatorSnapshot, StatusIndicator};
pub use device::{IndicatorDevice, IndicatorError, LedDevice, NoopDevice};
pub use state::{IndicatorState, Output};

use tracing::{info, warn};

use crate::config::IndicatorConfig;
use crate::gpio::{HardwareContext, Polarity};

/// Pick the highest-priority device that initialises
pub fn select_device(
    config: &IndicatorConfig,
    hw: Option<&mut HardwareContext>,
) -> Box<dyn IndicatorDevice> {
    if let Some(ring_config) = &config.ring {
        match ring::open(ring_config) {
            Ok(device) => return device,
            Err(e) => warn!(error = %e, "LED ring unavailable, trying next indicator"),
        }
    }

    if let Some(pin) = config.led_pin {
        match hw {
            Some(hw) => {
                let polarity = Polarity::from_active_high(config.led_active_high);
                match LedDevice::open(hw, pin, polarity) {
                    Ok(led) => return Box::new(led),
                    Err(e) => {
                        warn!(pin, error = %e, "could not initialize status LED; continuing without it")
                    }
                }
            }
            None => warn!(pin, "status LED configured but GPIO is unavailable"),
        }
    }

    info!("no status indicator hardware; phases are logged only");
    Box::new(NoopDevice)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::RingConfig;
    use crate::gpio::sim::{SimBoard, SimFailure};

    fn config(led_pin: Option<u32>, ring: bool) -> IndicatorConfig {
        IndicatorConfig {
            led_pin,
            led_active_high: true,
            blink: Duration::from_millis(50),
            ring: ring.then_some(RingConfig {
                count: 12,
                pin: 18,
                brightness: 128,
            }),
        }
    }

    #[test]
    fn test_led_selected_when_configured() {
        let board = SimBoard::new();
        let mut hw = HardwareContext::with_chip(board.chip());
        let device = select_device(&config(Some(27), false), Some(&mut hw));
        assert_eq!(device.name(), "gpio-led");
        assert!(board.is_claimed(27));
    }

    #[cfg(not(feature = "ring"))]
    #[test]
    fn test_failed_ring_falls_back_to_led() {
        let board = SimBoard::new();
        let mut hw = HardwareContext::with_chip(board.chip());
        let device = select_device(&config(Some(27), true), Some(&mut hw));
        assert_eq!(device.name(), "gpio-led");
    }

    #[test]
    fn test_led_failure_falls_back_to_noop() {
        let board = SimBoard::new();
        board.deny_request(27, SimFailure::Busy);
        let mut hw = HardwareContext::with_chip(board.chip());
        let device = select_device(&config(Some(27), false), Some(&mut hw));
        assert_eq!(device.name(), "none");
    }

    #[test]
    fn test_no_gpio_means_noop() {
        let device = select_device(&config(Some(27), false), None);
        assert_eq!(device.name(), "none");
        let device = select_device(&config(None, false), None);
        assert_eq!(device.name(), "none");
    }
}
