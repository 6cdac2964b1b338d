//! Basic module commands: ping, reset, version, command listing, factory
//! restore and echo control.

use crate::command::{CommandKind, TypeHandlers, OK};
use crate::device::{Action, Device, AT_VERSION, BIN_VERSION, COMPILE_TIME, SDK_VERSION};

use super::Registration;

pub(crate) fn commands() -> Vec<Registration> {
    vec![
        ("AT", TypeHandlers::new().on(CommandKind::Execute, ping)),
        ("AT+RST", TypeHandlers::new().on(CommandKind::Execute, reset)),
        ("AT+GMR", TypeHandlers::new().on(CommandKind::Execute, version)),
        ("AT+CMD", TypeHandlers::new().on(CommandKind::Query, list)),
        (
            "AT+RESTORE",
            TypeHandlers::new().on(CommandKind::Execute, restore),
        ),
        ("ATE0", TypeHandlers::new().on(CommandKind::Execute, echo_off)),
        ("ATE1", TypeHandlers::new().on(CommandKind::Execute, echo_on)),
    ]
}

fn ping(dev: &mut Device, _args: &str) {
    dev.send_line(OK);
}

/// `AT+RST` and `AT+RESTORE` behave identically here: the emulated module
/// has no persisted settings to distinguish a reboot from a factory reset,
/// so both reply, reset every setting, and announce `ready` once the
/// simulated boot completes.
fn reset(dev: &mut Device, _args: &str) {
    dev.send_line(OK);
    dev.restore();
    dev.defer(dev.timing.ready_delay, Action::Send("ready".into()));
}

fn restore(dev: &mut Device, args: &str) {
    reset(dev, args);
}

fn version(dev: &mut Device, _args: &str) {
    dev.send_line(AT_VERSION);
    dev.send_line(&format!("SDK version:{}", SDK_VERSION));
    dev.send_line(COMPILE_TIME);
    dev.send_line(&format!("Bin version:{}", BIN_VERSION));
    dev.send_line(OK);
}

fn list(dev: &mut Device, _args: &str) {
    for line in dev.command_listing() {
        dev.send_line(&line);
    }
    dev.send_line(OK);
}

fn echo_off(dev: &mut Device, _args: &str) {
    dev.echo = false;
    dev.send_line(OK);
}

fn echo_on(dev: &mut Device, _args: &str) {
    dev.echo = true;
    dev.send_line(OK);
}

#[cfg(test)]
mod tests {
    use tokio::time::{Duration, Instant};

    use crate::device::Device;

    fn device() -> Device {
        let mut dev = Device::new().unwrap();
        dev.echo = false;
        dev
    }

    fn feed(dev: &mut Device, line: &str) -> String {
        for b in line.bytes() {
            dev.on_byte(b);
        }
        dev.on_byte(b'\r');
        String::from_utf8(dev.take_output()).unwrap()
    }

    #[test]
    fn ping_replies_ok() {
        let mut dev = device();
        assert_eq!(feed(&mut dev, "AT"), "OK\r\n");
    }

    #[test]
    fn version_lists_firmware_strings() {
        let mut dev = device();
        let out = feed(&mut dev, "AT+GMR");
        assert!(out.contains("AT version (FAKE):2.2.0.0"));
        assert!(out.contains("SDK version:v4.0.1 (FAKE)"));
        assert!(out.contains("compile time:Oct 16 2023 12:18:22"));
        assert!(out.contains("Bin version:2.1.0 (FAKE)"));
        assert!(out.ends_with("OK\r\n"));
    }

    #[test]
    fn command_listing_ends_with_ok() {
        let mut dev = device();
        let out = feed(&mut dev, "AT+CMD?");
        assert!(out.contains("+CMD:0,"));
        assert!(out.ends_with("OK\r\n"));
    }

    #[test]
    fn reset_replies_then_announces_ready_after_boot() {
        let mut dev = device();
        dev.wifi.init = true;
        let out = feed(&mut dev, "AT+RST");
        assert_eq!(out, "OK\r\n");
        assert!(!dev.wifi.init);
        // Echo is back on after the reset; the ready banner is deferred.
        assert!(dev.echo);
        dev.run_due(Instant::now() + Duration::from_secs(1));
        assert_eq!(String::from_utf8(dev.take_output()).unwrap(), "ready\r\n");
    }

    #[test]
    fn restore_matches_reset() {
        let mut dev = device();
        dev.sntp.timezone = 7;
        let out = feed(&mut dev, "AT+RESTORE");
        assert_eq!(out, "OK\r\n");
        assert_eq!(dev.sntp.timezone, 0);
        assert!(dev.next_deadline().is_some());
    }

    #[test]
    fn echo_toggle() {
        let mut dev = Device::new().unwrap();
        assert!(dev.echo);
        feed(&mut dev, "ATE0");
        assert!(!dev.echo);
        feed(&mut dev, "ATE1");
        assert!(dev.echo);
    }
}
