//! Backend selection
//!
//! Tried once at startup in priority order: the character device chips in
//! [`CHIP_PATHS`] order, then the sysfs interface.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::cdev::CdevChip;
use super::line::{GpioChip, GpioError};
use super::sysfs::SysfsChip;

/// Chip devices tried for the line-based backend; chip 4 first since that
/// is where the header pins live on the Raspberry Pi 5.
pub const CHIP_PATHS: [&str; 5] = [
    "/dev/gpiochip4",
    "/dev/gpiochip0",
    "/dev/gpiochip1",
    "/dev/gpiochip2",
    "/dev/gpiochip3",
];

/// Pick the first candidate that exists and opens.
///
/// Returns the most actionable failure when none do: a permission problem
/// beats a busy line, which beats "nothing found".
pub fn probe_chip<C, E, O>(
    candidates: &[PathBuf],
    exists: E,
    mut open: O,
) -> Result<(PathBuf, C), GpioError>
where
    E: Fn(&Path) -> bool,
    O: FnMut(&Path) -> Result<C, GpioError>,
{
    let mut best: Option<GpioError> = None;

    for path in candidates.iter().filter(|p| exists(p)) {
        match open(path) {
            Ok(chip) => return Ok((path.clone(), chip)),
            Err(e) => {
                debug!(chip = %path.display(), error = %e, "gpio chip candidate rejected");
                if rank(&e) > best.as_ref().map(rank).unwrap_or(0) {
                    best = Some(e);
                }
            }
        }
    }

    Err(best.unwrap_or(GpioError::DeviceNotFound))
}

fn rank(err: &GpioError) -> u8 {
    match err {
        GpioError::PermissionDenied { .. } => 3,
        GpioError::DeviceBusy { .. } => 2,
        _ => 1,
    }
}

pub fn default_candidates() -> Vec<PathBuf> {
    CHIP_PATHS.iter().map(PathBuf::from).collect()
}

/// Open the highest-priority backend able to serve `offsets`.
///
/// `sysfs_base` is added to offsets when falling back to global numbering.
pub fn open_backend(offsets: &[u32], sysfs_base: u32) -> Result<Box<dyn GpioChip>, GpioError> {
    let candidates = default_candidates();
    let mut cdev_error = None;

    if candidates.iter().any(|p| p.exists()) {
        match probe_chip(&candidates, |p| p.exists(), |p| CdevChip::open(p, offsets)) {
            Ok((path, chip)) => {
                info!(chip = %path.display(), "using GPIO character device backend");
                return Ok(Box::new(chip));
            }
            Err(e) => {
                warn!(error = %e, "GPIO character devices present but unusable");
                cdev_error = Some(e);
            }
        }
    }

    if SysfsChip::available() {
        let chip = SysfsChip::open(sysfs_base)?;
        info!(base = sysfs_base, "using legacy sysfs GPIO backend");
        return Ok(Box::new(chip));
    }

    Err(cdev_error.unwrap_or(GpioError::HardwareUnavailable))
}
