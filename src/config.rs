//! Configuration loading and management
//!
//! Everything comes from environment variables (a `.env` file is loaded
//! into the environment first). Bad numeric values never abort startup:
//! they are logged and the default is used or the feature disabled.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::warn;

pub const DEFAULT_BUTTON_PIN: u32 = 17;
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_BLINK_SECONDS: f64 = 0.05;
pub const DEFAULT_RING_COUNT: usize = 12;
pub const DEFAULT_RING_PIN: i32 = 18;
pub const DEFAULT_RING_BRIGHTNESS: u8 = 128;
pub const DEFAULT_COOLDOWN_MS: u64 = 1000;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub button: ButtonConfig,
    pub indicator: IndicatorConfig,
    pub session: SessionConfig,
    /// Added to pin numbers when the sysfs backend is used
    pub sysfs_base: u32,
}

#[derive(Debug, Clone)]
pub struct ButtonConfig {
    pub pin: u32,
    pub debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct IndicatorConfig {
    /// Simple LED pin; `None` disables the LED
    pub led_pin: Option<u32>,
    pub led_active_high: bool,
    /// Thinking blink; zero disables it
    pub blink: Duration,
    /// Pixel ring, when enabled and valid
    pub ring: Option<RingConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    pub count: usize,
    pub pin: i32,
    pub brightness: u8,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Shell command that runs one conversation
    pub command: String,
    /// Pause after a session before the button is honoured again
    pub cooldown: Duration,
}

impl Config {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let button = ButtonConfig {
            pin: parse_or(&get, "BUTTON_PIN", DEFAULT_BUTTON_PIN),
            debounce: Duration::from_millis(parse_or(&get, "BUTTON_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)),
        };

        let led_pin = get("STATUS_LED_PIN").and_then(|raw| match raw.parse::<u32>() {
            Ok(pin) => Some(pin),
            Err(_) => {
                warn!(
                    value = %raw,
                    "invalid STATUS_LED_PIN, provide a GPIO number such as 27; ignoring LED configuration"
                );
                None
            }
        });

        let indicator = IndicatorConfig {
            led_pin,
            led_active_high: get("STATUS_LED_ACTIVE_HIGH").map(|v| v != "0").unwrap_or(true),
            blink: parse_blink(get("THINKING_BLINK_SECONDS")),
            ring: parse_ring(&get),
        };

        let Some(command) = get("SESSION_COMMAND") else {
            bail!("SESSION_COMMAND is not set in the environment");
        };
        let session = SessionConfig {
            command,
            cooldown: Duration::from_millis(parse_or(&get, "SESSION_COOLDOWN_MS", DEFAULT_COOLDOWN_MS)),
        };

        Ok(Self {
            button,
            indicator,
            session,
            sysfs_base: parse_or(&get, "GPIO_SYSFS_BASE", 0),
        })
    }

    /// Every GPIO offset the daemon will request
    pub fn gpio_offsets(&self) -> Vec<u32> {
        let mut offsets = vec![self.button.pin];
        offsets.extend(self.indicator.led_pin);
        offsets
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, %default, "invalid value, using default");
            default
        }),
    }
}

fn parse_blink(raw: Option<String>) -> Duration {
    let Some(raw) = raw else {
        return Duration::from_secs_f64(DEFAULT_BLINK_SECONDS);
    };
    match raw.parse::<f64>() {
        Ok(secs) if secs == 0.0 => Duration::ZERO,
        Ok(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
            warn!(value = %raw, "THINKING_BLINK_SECONDS too large, using default");
            Duration::from_secs_f64(DEFAULT_BLINK_SECONDS)
        }),
        Ok(_) => {
            warn!(value = %raw, "THINKING_BLINK_SECONDS must be >= 0, disabling blink");
            Duration::ZERO
        }
        Err(_) => {
            warn!(value = %raw, default = DEFAULT_BLINK_SECONDS, "invalid THINKING_BLINK_SECONDS, using default");
            Duration::from_secs_f64(DEFAULT_BLINK_SECONDS)
        }
    }
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn parse_ring<G>(get: &G) -> Option<RingConfig>
where
    G: Fn(&str) -> Option<String>,
{
    if !parse_flag(get("LED_RING_ENABLED")) {
        return None;
    }

    let count = match get("LED_RING_COUNT").map(|v| v.parse::<usize>()) {
        None => DEFAULT_RING_COUNT,
        Some(Ok(n)) if n > 0 => n,
        Some(_) => {
            warn!("invalid LED_RING_COUNT, disabling LED ring");
            return None;
        }
    };

    let pin = match get("LED_RING_PIN").map(|v| v.parse::<i32>()) {
        None => DEFAULT_RING_PIN,
        Some(Ok(p)) if p >= 0 => p,
        Some(_) => {
            warn!("invalid LED_RING_PIN, disabling LED ring");
            return None;
        }
    };

    let brightness = match get("LED_RING_BRIGHTNESS") {
        None => DEFAULT_RING_BRIGHTNESS,
        Some(raw) => match raw.parse::<i64>() {
            Ok(v) => {
                let clamped = v.clamp(0, 255);
                if clamped != v {
                    warn!(value = v, clamped, "LED_RING_BRIGHTNESS out of range 0-255");
                }
                clamped as u8
            }
            Err(_) => {
                warn!(value = %raw, "invalid LED_RING_BRIGHTNESS, using default");
                DEFAULT_RING_BRIGHTNESS
            }
        },
    };

    Some(RingConfig {
        count,
        pin,
        brightness,
    })
}
