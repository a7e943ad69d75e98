//! Binary status output (the "connected" LED).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

/// A binary on/off output signal.
pub trait StatusIndicator: Send + Sync {
    fn set(&self, on: bool);
}

/// LED exposed by the Linux LED class driver (`/sys/class/leds/<name>`).
pub struct SysfsLed {
    brightness: PathBuf,
}

impl SysfsLed {
    pub fn new(name: &str) -> Self {
        Self {
            brightness: PathBuf::from("/sys/class/leds").join(name).join("brightness"),
        }
    }
}

impl StatusIndicator for SysfsLed {
    fn set(&self, on: bool) {
        let value = if on { "1" } else { "0" };
        match std::fs::write(&self.brightness, value) {
            Ok(()) => debug!(path = %self.brightness.display(), on, "status LED updated"),
            // A missing or read-only LED must not affect the benchmark.
            Err(e) => warn!(
                path = %self.brightness.display(),
                error = %e,
                "failed to update status LED"
            ),
        }
    }
}

/// Indicator that only reports its state in the log.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set(&self, on: bool) {
        info!(on, "status indicator");
    }
}

/// Indicator that keeps its state in memory.
#[derive(Debug, Default)]
pub struct MemoryIndicator {
    on: AtomicBool,
}

impl MemoryIndicator {
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }
}

impl StatusIndicator for MemoryIndicator {
    fn set(&self, on: bool) {
        self.on.store(on, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_indicator_tracks_state() {
        let led = MemoryIndicator::default();
        assert!(!led.is_on());
        led.set(true);
        assert!(led.is_on());
        led.set(false);
        assert!(!led.is_on());
    }

    #[test]
    fn test_sysfs_led_path() {
        let led = SysfsLed::new("led0");
        assert_eq!(led.brightness, PathBuf::from("/sys/class/leds/led0/brightness"));
    }

    #[test]
    fn test_sysfs_led_missing_device_is_not_fatal() {
        let led = SysfsLed::new("linkbench-test-nonexistent-led");
        led.set(true);
        led.set(false);
    }
}
