//! # at-wifi-sim
//!
//! A virtual ESP-AT style WiFi + MQTT module for testing firmware without
//! hardware. Firmware talks AT commands over a byte stream (a Unix socket
//! standing in for the UART); WiFi behavior is emulated, MQTT behavior is
//! real and bridged to a live broker.
//!
//! ## Features
//!
//! - **AT command surface**: ping, reset, version, echo, WiFi init/join/
//!   scan/country, SNTP, and the MQTT command family
//! - **Live MQTT bridge**: `AT+MQTTCONN`, `AT+MQTTPUB` and `AT+MQTTSUB` go
//!   to a real broker; inbound messages surface as `+MQTTSUBRECV:` lines
//! - **Non-blocking timing**: joins, scans and time syncs deliver their
//!   lines on realistic delays while the module keeps serving commands
//! - **Hardware reset**: a file-backed GPIO line reboots the module the
//!   way a real reset pin would
//!
//! ## Architecture
//!
//! One session is one [`reactor::Runner`] task selecting over the serial
//! stream, the reset pin poll, the device's deferred timers and the MQTT
//! event loop. The [`device::Device`] itself is a synchronous state
//! machine, which keeps the whole command surface testable without I/O.
//!
//! - `command` - line classification and the keyword dispatch table
//! - `groups` - the AT command handlers, one module per family
//! - `wifi` / `sntp` / `mqtt` - per-subsystem session state
//! - `reactor` / `reset` - the event loop and the reset line
//!
//! ## Example
//!
//! ```rust
//! use at_wifi_sim::device::Device;
//!
//! let mut dev = Device::new().unwrap();
//! dev.echo = false;
//! for b in b"AT\r" {
//!     dev.on_byte(*b);
//! }
//! assert_eq!(dev.take_output(), b"OK\r\n");
//! ```

#![warn(missing_docs)]

/// Line classification, reply tokens and the handler dispatch table.
pub mod command;
/// Runtime configuration and harness paths.
pub mod config;
/// The emulated module state machine.
pub mod device;
/// AT command handler groups.
mod groups;
/// MQTT session state and the live broker bridge.
pub mod mqtt;
/// The per-session event loop.
pub mod reactor;
/// File-backed reset pin.
pub mod reset;
/// SNTP configuration state.
pub mod sntp;
/// WiFi association state machine.
pub mod wifi;

pub use config::Config;
pub use device::Device;
pub use reactor::Runner;
pub use reset::ResetPin;
