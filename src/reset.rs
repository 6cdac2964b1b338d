//! Reset pin emulation.
//!
//! Hardware holds the module in reset by driving a GPIO; here the pin is a
//! file the firmware harness writes `0` or `1` into. The reactor polls it
//! on a fixed period; once the pin has been released (or was never
//! asserted) for the boot duration after an assert, the module reboots and
//! announces `ready`.

use std::fs;
use std::path::PathBuf;

use log::{debug, info};
use tokio::time::{Duration, Instant};

/// How often the reactor samples the pin file.
pub const POLL_PERIOD: Duration = Duration::from_micros(500);

/// Time from reset release to the `ready` banner.
pub const BOOT_DELAY: Duration = Duration::from_secs(2);

/// A GPIO reset line backed by a file containing `0` or `1`.
pub struct ResetPin {
    path: PathBuf,
    boot_delay: Duration,
    asserted_at: Option<Instant>,
    latched: bool,
}

impl ResetPin {
    /// Watch `path` with the default boot delay.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_boot_delay(path, BOOT_DELAY)
    }

    /// Watch `path`, rebooting `boot_delay` after the pin asserts.
    pub fn with_boot_delay(path: impl Into<PathBuf>, boot_delay: Duration) -> Self {
        Self {
            path: path.into(),
            boot_delay,
            asserted_at: None,
            latched: false,
        }
    }

    /// Current pin level. A missing or unparsable file reads as deasserted.
    fn read_pin(&self) -> bool {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(|v| v != 0)
            .unwrap_or(false)
    }

    /// Sample the pin. Returns true exactly once per assert, when the boot
    /// delay after the initial assert has elapsed; the reboot stays latched
    /// until the pin deasserts.
    pub fn poll(&mut self, now: Instant) -> bool {
        let asserted = self.read_pin();
        if !asserted {
            if self.asserted_at.take().is_some() {
                debug!("reset pin released");
            }
            self.latched = false;
            return false;
        }
        match self.asserted_at {
            None => {
                info!("reset pin asserted");
                self.asserted_at = Some(now);
                false
            }
            Some(since) if !self.latched && now - since >= self.boot_delay => {
                self.latched = true;
                true
            }
            Some(_) => false,
        }
    }
}
