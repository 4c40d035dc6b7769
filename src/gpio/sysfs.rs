//! Legacy backend over `/sys/class/gpio`
//!
//! Pins are global numbers (optionally shifted by a chip base) and there is
//! a single implicit handle. Export/unexport normally needs root or a udev
//! rule granting the `gpio` group access.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use sysfs_gpio::{Direction as SysDirection, Edge as SysEdge, Pin, PinPoller};
use tracing::{debug, warn};

use super::line::{
    Bias, BackendKind, Direction, Edge, EdgeEvent, EdgeKind, GpioChip, GpioError, GpioLine, Level,
    LineRequest, Polarity,
};

const SYSFS_ROOT: &str = "/sys/class/gpio";
const EXPORT_RETRIES: u32 = 10;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(50);

pub struct SysfsChip {
    base: u32,
    name: String,
}

impl SysfsChip {
    /// Whether the sysfs GPIO interface exists on this kernel
    pub fn available() -> bool {
        Path::new(SYSFS_ROOT).join("export").exists()
    }

    pub fn open(base: u32) -> Result<Self, GpioError> {
        if !Self::available() {
            return Err(GpioError::DeviceNotFound);
        }
        Ok(Self {
            base,
            name: SYSFS_ROOT.to_string(),
        })
    }
}

impl GpioChip for SysfsChip {
    fn kind(&self) -> BackendKind {
        BackendKind::LegacySysfs
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn request_line(&mut self, request: &LineRequest) -> Result<Box<dyn GpioLine>, GpioError> {
        let number = u64::from(self.base + request.offset);
        let pin = Pin::new(number);
        let path = format!("{SYSFS_ROOT}/gpio{number}");

        // A crashed run leaves its pins exported; reclaim them once
        if pin.is_exported() {
            warn!(pin = number, "pin already exported, unexporting and retrying");
            if let Err(e) = pin.unexport() {
                warn!(pin = number, error = %e, "could not unexport stale pin");
                return Err(GpioError::DeviceBusy {
                    offset: request.offset,
                });
            }
        }
        pin.export().map_err(|e| map_err(e, &path, request.offset))?;

        if let Err(e) = configure(&pin, request) {
            if let Err(unexport) = pin.unexport() {
                warn!(pin = number, error = %unexport, "could not unexport pin after failed setup");
            }
            return Err(map_err(e, &path, request.offset));
        }

        let poller = match (request.direction, request.edge) {
            (Direction::Input, Some(_)) => match pin.get_poller() {
                Ok(mut poller) => {
                    // The first poll after arming an edge returns at once
                    let _ = poller.poll(0);
                    Some(poller)
                }
                Err(e) => {
                    warn!(pin = number, error = %e, "edge polling unavailable, falling back to level sampling");
                    None
                }
            },
            _ => None,
        };

        debug!(pin = number, consumer = request.consumer, "sysfs line exported");

        Ok(Box::new(SysfsLine {
            pin,
            path,
            offset: request.offset,
            polarity: request.polarity,
            poller,
        }))
    }

    fn close(self: Box<Self>) -> Result<(), GpioError> {
        Ok(())
    }
}

fn configure(pin: &Pin, request: &LineRequest) -> sysfs_gpio::Result<()> {
    let direction = || match request.direction {
        Direction::Input => SysDirection::In,
        Direction::Output => match request.initial {
            Level::High => SysDirection::High,
            Level::Low => SysDirection::Low,
        },
    };

    // udev may still be fixing permissions on the freshly exported node
    let mut attempt = 0;
    loop {
        match pin.set_direction(direction()) {
            Ok(()) => break,
            Err(e) if attempt < EXPORT_RETRIES => {
                debug!(error = %e, attempt, "sysfs direction not yet writable");
                attempt += 1;
                thread::sleep(EXPORT_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }

    if request.direction == Direction::Input {
        if request.bias != Bias::Disabled {
            warn!(
                pin = request.offset,
                "sysfs cannot set pull bias; relying on board/firmware pull configuration"
            );
        }
        if let Some(edge) = request.edge {
            pin.set_edge(match edge {
                Edge::Falling => SysEdge::FallingEdge,
            })?;
        }
    }
    Ok(())
}

fn map_err(err: sysfs_gpio::Error, path: &str, offset: u32) -> GpioError {
    match err {
        sysfs_gpio::Error::Io(io) => GpioError::from_io(&io, path, Some(offset)),
        sysfs_gpio::Error::Unsupported(msg) => GpioError::Unsupported(msg),
        other => GpioError::from_message(&other.to_string(), path, Some(offset)),
    }
}

struct SysfsLine {
    pin: Pin,
    path: String,
    offset: u32,
    polarity: Polarity,
    poller: Option<PinPoller>,
}

impl GpioLine for SysfsLine {
    fn offset(&self) -> u32 {
        self.offset
    }

    fn polarity(&self) -> Polarity {
        self.polarity
    }

    fn read(&mut self) -> Result<Level, GpioError> {
        let bit = self
            .pin
            .get_value()
            .map_err(|e| map_err(e, &self.path, self.offset))?;
        Ok(Level::from_bit(bit))
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.pin
            .set_value(level.as_bit())
            .map_err(|e| map_err(e, &self.path, self.offset))
    }

    fn supports_edge_events(&self) -> bool {
        self.poller.is_some()
    }

    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, GpioError> {
        let Some(poller) = self.poller.as_mut() else {
            return Err(GpioError::Unsupported(format!(
                "line {} has no edge poller",
                self.offset
            )));
        };
        let millis = isize::try_from(timeout.as_millis()).unwrap_or(isize::MAX);
        match poller
            .poll(millis)
            .map_err(|e| map_err(e, &self.path, self.offset))?
        {
            Some(bit) => Ok(Some(EdgeEvent {
                offset: self.offset,
                kind: if bit == 0 {
                    EdgeKind::Falling
                } else {
                    EdgeKind::Rising
                },
                at: Instant::now(),
            })),
            None => Ok(None),
        }
    }

    fn release(self: Box<Self>) -> Result<(), GpioError> {
        let SysfsLine {
            pin,
            path,
            offset,
            poller,
            ..
        } = *self;
        drop(poller);
        pin.unexport().map_err(|e| map_err(e, &path, offset))?;
        debug!(%path, "sysfs line unexported");
        Ok(())
    }
}
