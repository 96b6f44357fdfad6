//! Indicator light backends.
//!
//! The signal task is the single writer; backends just turn the light on and
//! off. Two hardware paths exist on the device images we target: an LED
//! class device under `/sys/class/leds/` and a raw GPIO line under
//! `/sys/class/gpio/`. Both are plain sysfs writes.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use fieldsync_core::LedConfig;

/// Sets the indicator light state.
pub trait LedBackend: Send {
    /// Turn the light on or off.
    fn set(&mut self, on: bool) -> io::Result<()>;
}

/// Build the backend selected by configuration.
///
/// Errors from opening real hardware are surfaced so the caller can decide
/// to fall back to [`NullLed`] with a warning rather than abort the sync.
pub fn backend_for(config: &LedConfig) -> io::Result<Box<dyn LedBackend>> {
    match config {
        LedConfig::None => Ok(Box::new(NullLed)),
        LedConfig::Sysfs { name } => Ok(Box::new(SysfsLed::open(name)?)),
        LedConfig::Gpio { pin } => Ok(Box::new(GpioLed::open(*pin)?)),
    }
}

/// No light attached; swallows pattern writes.
pub struct NullLed;

impl LedBackend for NullLed {
    fn set(&mut self, _on: bool) -> io::Result<()> {
        Ok(())
    }
}

/// An LED class device: `/sys/class/leds/<name>/{trigger,brightness}`.
pub struct SysfsLed {
    brightness: PathBuf,
}

impl SysfsLed {
    /// Take over the named LED, disabling any kernel trigger.
    pub fn open(name: &str) -> io::Result<Self> {
        let base = Path::new("/sys/class/leds").join(name);
        // The kernel may be driving this LED (heartbeat, mmc activity);
        // claim it once so our writes stick.
        fs::write(base.join("trigger"), b"none")?;
        let led = Self { brightness: base.join("brightness") };
        Ok(led)
    }
}

impl LedBackend for SysfsLed {
    fn set(&mut self, on: bool) -> io::Result<()> {
        fs::write(&self.brightness, if on { b"1" } else { b"0" })
    }
}

/// A raw GPIO line via the sysfs interface.
pub struct GpioLed {
    value: PathBuf,
}

impl GpioLed {
    /// Export (if needed) and configure the pin as an output.
    pub fn open(pin: u32) -> io::Result<Self> {
        let base = PathBuf::from(format!("/sys/class/gpio/gpio{pin}"));
        if !base.exists() {
            fs::write("/sys/class/gpio/export", pin.to_string())?;
        }
        fs::write(base.join("direction"), b"out")?;
        Ok(Self { value: base.join("value") })
    }
}

impl LedBackend for GpioLed {
    fn set(&mut self, on: bool) -> io::Result<()> {
        fs::write(&self.value, if on { b"1" } else { b"0" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_accepts_writes() {
        let mut led = NullLed;
        led.set(true).unwrap();
        led.set(false).unwrap();
    }

    #[test]
    fn none_config_builds_null_backend() {
        assert!(backend_for(&LedConfig::None).is_ok());
    }
}
