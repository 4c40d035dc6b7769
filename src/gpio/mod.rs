//! GPIO backend abstraction
//!
//! Two kernel interfaces are supported behind one pair of traits:
//! - the GPIO character device (`/dev/gpiochipN`, line requests)
//! - the legacy sysfs interface (global pin numbers)
//!
//! The backend is probed once at startup and owned by a
//! [`HardwareContext`] for the rest of the process.

pub mod access;
mod cdev;
mod context;
mod line;
mod probe;
mod sysfs;

#[cfg(test)]
pub mod sim;

pub use context::HardwareContext;
pub use line::{EdgeKind, GpioError, GpioLine, Level, LineRequest, Polarity};
