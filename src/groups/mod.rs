//! AT command groups.
//!
//! Each submodule registers one functional family of commands and returns
//! its keyword → handler registrations from `commands()`. [`all`] merges
//! them for the device's dispatch table; a keyword registered twice is
//! rejected when the table is built.

mod basic;
mod mqtt;
mod sntp;
mod wifi;

use crate::command::TypeHandlers;

/// One keyword with its per-kind handlers.
pub(crate) type Registration = (&'static str, TypeHandlers);

/// Every command registration, in group order.
pub(crate) fn all() -> Vec<Registration> {
    let mut commands = basic::commands();
    commands.extend(wifi::commands());
    commands.extend(sntp::commands());
    commands.extend(mqtt::commands());
    commands
}
