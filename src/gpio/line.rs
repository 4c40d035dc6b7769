//! Backend-neutral GPIO types
//!
//! Every backend hands out lines through the same two traits, so callers
//! never branch on which kernel interface is in use.

use std::fmt;
use std::io;
use std::time::{Duration, Instant};

use nix::errno::Errno;

/// Physical signal level on a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            Level::Low
        } else {
            Level::High
        }
    }

    pub fn as_bit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::High => write!(f, "HIGH"),
        }
    }
}

/// Which physical level counts as "active"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub fn from_active_high(active_high: bool) -> Self {
        if active_high {
            Polarity::ActiveHigh
        } else {
            Polarity::ActiveLow
        }
    }

    /// Physical level for a logical state: high iff `active XOR active_low`
    pub fn level_for(self, active: bool) -> Level {
        let active_low = self == Polarity::ActiveLow;
        if active ^ active_low {
            Level::High
        } else {
            Level::Low
        }
    }

    /// Logical state of a physical level
    pub fn is_active(self, level: Level) -> bool {
        self.level_for(true) == level
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    PullUp,
    Disabled,
}

/// Edge to report on an input line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Falling,
}

/// Direction of a detected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Rising,
    Falling,
}

/// A transition observed on an input line
#[derive(Debug, Clone, Copy)]
pub struct EdgeEvent {
    pub offset: u32,
    pub kind: EdgeKind,
    /// When the edge was read off the line
    pub at: Instant,
}

/// Everything needed to claim one line
#[derive(Debug, Clone)]
pub struct LineRequest {
    pub offset: u32,
    pub direction: Direction,
    pub bias: Bias,
    pub polarity: Polarity,
    /// Edge detection for inputs; `None` means level reads only
    pub edge: Option<Edge>,
    /// Initial physical level for outputs
    pub initial: Level,
    pub consumer: &'static str,
}

impl LineRequest {
    /// Pull-up input reporting falling edges, pressed when low
    pub fn button(offset: u32) -> Self {
        Self {
            offset,
            direction: Direction::Input,
            bias: Bias::PullUp,
            polarity: Polarity::ActiveLow,
            edge: Some(Edge::Falling),
            initial: Level::High,
            consumer: "hanson-button",
        }
    }

    /// Output starting at the "off" level for its polarity
    pub fn led(offset: u32, polarity: Polarity) -> Self {
        Self {
            offset,
            direction: Direction::Output,
            bias: Bias::Disabled,
            polarity,
            edge: None,
            initial: polarity.level_for(false),
            consumer: "hanson-led",
        }
    }
}

/// Kernel interface a chip was opened through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// GPIO character device (`/dev/gpiochipN`)
    LineChip,
    /// sysfs global numbering (`/sys/class/gpio`)
    LegacySysfs,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::LineChip => write!(f, "gpio-cdev"),
            BackendKind::LegacySysfs => write!(f, "sysfs"),
        }
    }
}

/// Errors raised by GPIO backends
#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("no GPIO backend is available on this system")]
    HardwareUnavailable,

    #[error("permission denied accessing {path}")]
    PermissionDenied { path: String },

    #[error("GPIO line {offset} is already claimed")]
    DeviceBusy { offset: u32 },

    #[error("no accessible GPIO chip device found")]
    DeviceNotFound,

    #[error("GPIO line {offset} is beyond the {num_lines} lines of {chip}")]
    LineOutOfRange {
        chip: String,
        offset: u32,
        num_lines: u32,
    },

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),

    #[error("GPIO I/O error: {0}")]
    Io(String),
}

impl GpioError {
    /// Map an OS error on `path`/`offset` onto the taxonomy
    pub fn from_io(err: &io::Error, path: &str, offset: Option<u32>) -> Self {
        if let Some(errno) = err.raw_os_error() {
            return Self::from_errno(errno, path, offset);
        }
        match err.kind() {
            io::ErrorKind::PermissionDenied => GpioError::PermissionDenied {
                path: path.to_string(),
            },
            io::ErrorKind::NotFound => GpioError::DeviceNotFound,
            _ => GpioError::Io(format!("{path}: {err}")),
        }
    }

    /// Map a raw errno from a failed syscall
    pub fn from_errno(errno: i32, path: &str, offset: Option<u32>) -> Self {
        match Errno::from_i32(errno) {
            Errno::EACCES | Errno::EPERM => GpioError::PermissionDenied {
                path: path.to_string(),
            },
            Errno::EBUSY => GpioError::DeviceBusy {
                offset: offset.unwrap_or_default(),
            },
            Errno::ENOENT | Errno::ENODEV | Errno::ENXIO => GpioError::DeviceNotFound,
            other => GpioError::Io(format!("{path}: {}", other.desc())),
        }
    }

    /// Map an error known only by its message, for errors that carry no errno
    pub fn from_message(msg: &str, path: &str, offset: Option<u32>) -> Self {
        let lower = msg.to_ascii_lowercase();
        if lower.contains("permission denied") || lower.contains("eacces") {
            GpioError::PermissionDenied {
                path: path.to_string(),
            }
        } else if lower.contains("busy") || lower.contains("os error 16") {
            GpioError::DeviceBusy {
                offset: offset.unwrap_or_default(),
            }
        } else if lower.contains("no such file") || lower.contains("not found") {
            GpioError::DeviceNotFound
        } else {
            GpioError::Io(format!("{path}: {msg}"))
        }
    }

    /// Setup failures that the operator can fix (and should be told how)
    pub fn needs_remediation(&self) -> bool {
        matches!(
            self,
            GpioError::PermissionDenied { .. }
                | GpioError::DeviceBusy { .. }
                | GpioError::DeviceNotFound
                | GpioError::HardwareUnavailable
        )
    }
}

/// An opened GPIO controller; lines are requested from it
pub trait GpioChip: Send {
    fn kind(&self) -> BackendKind;

    /// Device path or description, for logs
    fn name(&self) -> &str;

    fn request_line(&mut self, request: &LineRequest) -> Result<Box<dyn GpioLine>, GpioError>;

    /// Release the chip handle. All lines must be released first.
    fn close(self: Box<Self>) -> Result<(), GpioError>;
}

/// One claimed line. Releasing consumes it, so a released line cannot be
/// touched again.
pub trait GpioLine: Send {
    fn offset(&self) -> u32;

    fn polarity(&self) -> Polarity;

    fn read(&mut self) -> Result<Level, GpioError>;

    fn write(&mut self, level: Level) -> Result<(), GpioError>;

    /// Whether `wait_for_edge` is backed by kernel edge events
    fn supports_edge_events(&self) -> bool;

    /// Block up to `timeout` for the configured edge; `Ok(None)` on timeout
    fn wait_for_edge(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, GpioError>;

    fn release(self: Box<Self>) -> Result<(), GpioError>;

    fn set_active(&mut self, active: bool) -> Result<(), GpioError> {
        let level = self.polarity().level_for(active);
        self.write(level)
    }

    fn is_active(&mut self) -> Result<bool, GpioError> {
        let polarity = self.polarity();
        Ok(polarity.is_active(self.read()?))
    }
}
