//! Privilege checks and remediation hints for GPIO access failures

use nix::unistd::{getegid, geteuid, getgroups, Gid, Group, User};
use tracing::{info, warn};

use super::line::{BackendKind, GpioError};

/// Who the process runs as, as far as GPIO access is concerned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessReport {
    pub is_root: bool,
    pub in_gpio_group: bool,
    pub user: String,
}

impl AccessReport {
    /// Inspect the credentials of the running process
    pub fn current() -> Self {
        let euid = geteuid();

        let mut gids = getgroups().unwrap_or_else(|e| {
            warn!(error = %e, "could not read supplementary groups");
            Vec::new()
        });
        gids.push(getegid());

        let gpio_gid = match Group::from_name("gpio") {
            Ok(group) => group.map(|g| g.gid),
            Err(e) => {
                warn!(error = %e, "could not look up the gpio group");
                None
            }
        };

        let user = match User::from_uid(euid) {
            Ok(Some(user)) => user.name,
            _ => euid.to_string(),
        };

        Self::from_ids(euid.is_root(), &gids, gpio_gid, user)
    }

    /// Build a report from already-resolved ids. `gids` must include the
    /// primary group.
    pub fn from_ids(is_root: bool, gids: &[Gid], gpio_gid: Option<Gid>, user: String) -> Self {
        Self {
            is_root,
            in_gpio_group: gpio_gid.is_some_and(|gid| gids.contains(&gid)),
            user,
        }
    }

    /// Startup note about the likely outcome of GPIO access
    pub fn log_startup(&self) {
        if self.is_root {
            return;
        }
        if self.in_gpio_group {
            info!("running as non-root user in gpio group");
        } else {
            warn!("not in the gpio group; GPIO access may fail (see remediation below if it does)");
        }
    }
}

/// Steps the operator can take after `err` on `backend`
pub fn remediation(backend: Option<BackendKind>, err: &GpioError, access: &AccessReport) -> Vec<String> {
    let legacy = backend == Some(BackendKind::LegacySysfs);
    let mut steps = Vec::new();

    match err {
        GpioError::DeviceBusy { offset } => {
            if legacy {
                steps.push(format!(
                    "GPIO {offset} is still exported; free it with `echo {offset} > /sys/class/gpio/unexport` (plus any configured base)"
                ));
            } else {
                steps.push(format!(
                    "GPIO {offset} is claimed by another process; check with `gpioinfo` or stop the other service"
                ));
            }
            return steps;
        }
        GpioError::HardwareUnavailable => {
            steps.push(
                "no GPIO interface was found; this is expected on machines without GPIO headers"
                    .to_string(),
            );
            return steps;
        }
        _ => {}
    }

    if access.is_root {
        steps.push("unexpected GPIO error while running as root; check wiring and kernel GPIO support".to_string());
        return steps;
    }

    let device_check = if legacy {
        "ls -la /sys/class/gpio /dev/gpiomem"
    } else {
        "ls -la /dev/gpiochip*"
    };

    if access.in_gpio_group {
        steps.push("you are in the gpio group, but GPIO access still failed".to_string());
        steps.push("verify the udev rule is installed: ls -la /etc/udev/rules.d/99-gpio.rules".to_string());
        steps.push(format!("check device permissions: {device_check}"));
        steps.push("reload udev rules: sudo udevadm control --reload-rules && sudo udevadm trigger".to_string());
        steps.push("log out and back in (or reboot) so group membership takes effect".to_string());
    } else {
        steps.push(format!(
            "add your user to the gpio group: sudo usermod -a -G gpio {}",
            access.user
        ));
        if !legacy {
            steps.push(format!("verify permissions: {device_check}"));
        }
        steps.push("install the udev rule: sudo cp 99-gpio.rules /etc/udev/rules.d/".to_string());
        steps.push("reload udev rules: sudo udevadm control --reload-rules && sudo udevadm trigger".to_string());
        steps.push("log out and back in (or reboot)".to_string());
        steps.push("alternatively run the daemon with sudo".to_string());
    }
    steps
}

/// Log remediation steps, one per line
pub fn log_remediation(backend: Option<BackendKind>, err: &GpioError, access: &AccessReport) {
    if !err.needs_remediation() {
        return;
    }
    for (i, step) in remediation(backend, err, access).iter().enumerate() {
        warn!("  {}. {}", i + 1, step);
    }
}
