//! Runtime configuration.
//!
//! Defaults match the paths the firmware harness expects: everything lives
//! under the OSM working directory (`$OSM_LOC`, falling back to
//! `/tmp/osm`). A JSON file can override any field.
//!
//! # Example
//!
//! ```rust
//! use at_wifi_sim::config::Config;
//!
//! // Use defaults
//! let config = Config::default();
//!
//! // Or customize
//! let config = Config::default()
//!     .with_socket_path("/tmp/test.sock")
//!     .with_boot_delay_ms(0);
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable naming the OSM working directory.
pub const OSM_LOC_ENV: &str = "OSM_LOC";

/// Reset line GPIO number, fixed by the harness wiring.
pub const RESET_PIN: u32 = 10;

/// OSM working directory.
pub fn osm_loc() -> PathBuf {
    env::var_os(OSM_LOC_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp/osm"))
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unix socket the firmware's serial transport connects to.
    pub socket_path: PathBuf,
    /// File the harness writes the reset pin level into.
    pub reset_pin_path: PathBuf,
    /// Simulated boot time in milliseconds, for the reset pin.
    pub boot_delay_ms: u64,
    /// Whether command echo starts enabled.
    pub echo: bool,
}

impl Default for Config {
    fn default() -> Self {
        let loc = osm_loc();
        Self {
            socket_path: loc.join("UART_COMMS_slave"),
            reset_pin_path: loc.join("gpios").join(format!("gpio_{}", RESET_PIN)),
            boot_delay_ms: 2000,
            echo: true,
        }
    }
}

impl Config {
    /// Set the serial socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set the reset pin file path
    pub fn with_reset_pin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.reset_pin_path = path.into();
        self
    }

    /// Set the simulated boot time
    pub fn with_boot_delay_ms(mut self, ms: u64) -> Self {
        self.boot_delay_ms = ms;
        self
    }

    /// Set the echo default
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}
