//! WiFi commands: driver init, mode, association, country configuration,
//! system time and AP scanning.

use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::command::{split_args, unquote, CommandKind, TypeHandlers, OK, PARAM_ERROR, STATE_ERROR};
use crate::device::{Action, Device};
use crate::wifi::{LinkState, WifiMode};

use super::Registration;

/// The one access point every scan finds: WPA2/WPA3, CCMP, 802.11b/g/n.
const SCAN_RESULT: &str =
    "+CWLAP:(7,\"Devtank Wifi\",-71,\"08:65:87:ec:a0:e8\",1,-1,-1,4,4,7,0)";

pub(crate) fn commands() -> Vec<Registration> {
    vec![
        (
            "AT+CWINIT",
            TypeHandlers::new()
                .on(CommandKind::Query, init_query)
                .on(CommandKind::Set, init_set),
        ),
        (
            "AT+CWMODE",
            TypeHandlers::new()
                .on(CommandKind::Query, mode_query)
                .on(CommandKind::Set, mode_set),
        ),
        (
            "AT+CWSTATE",
            TypeHandlers::new().on(CommandKind::Query, state_query),
        ),
        (
            "AT+CWJAP",
            TypeHandlers::new()
                .on(CommandKind::Query, join_query)
                .on(CommandKind::Set, join_set)
                .on(CommandKind::Execute, join_execute),
        ),
        (
            "AT+CWQAP",
            TypeHandlers::new().on(CommandKind::Execute, leave),
        ),
        (
            "AT+CWCOUNTRY",
            TypeHandlers::new()
                .on(CommandKind::Query, country_query)
                .on(CommandKind::Set, country_set),
        ),
        (
            "AT+SYSTIMESTAMP",
            TypeHandlers::new().on(CommandKind::Query, systime_query),
        ),
        (
            "AT+CWLAP",
            TypeHandlers::new().on(CommandKind::Execute, scan),
        ),
    ]
}

fn init_query(dev: &mut Device, _args: &str) {
    let line = format!("+CWINIT:{}", dev.wifi.init as u8);
    dev.send_line(&line);
    dev.send_line(OK);
}

fn init_set(dev: &mut Device, args: &str) {
    match args.trim().parse::<i64>() {
        Ok(val @ (0 | 1)) => {
            dev.wifi.init = val == 1;
            dev.send_line(OK);
        }
        _ => dev.send_line(PARAM_ERROR),
    }
}

fn mode_query(dev: &mut Device, _args: &str) {
    let line = format!("+CWMODE:{}", dev.wifi.mode.code());
    dev.send_line(&line);
    dev.send_line(OK);
}

fn mode_set(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    let mode = parts[0]
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(WifiMode::from_code);
    match mode {
        Some(mode) => {
            dev.wifi.mode = mode;
            dev.send_line(OK);
        }
        None => dev.send_line(PARAM_ERROR),
    }
}

fn state_query(dev: &mut Device, _args: &str) {
    let line = format!("+CWSTATE:{},{}", dev.wifi.state.code(), dev.wifi.ssid);
    dev.send_line(&line);
    dev.send_line(OK);
}

fn join_query(dev: &mut Device, _args: &str) {
    let wifi = &dev.wifi;
    if !wifi.can_leave() {
        dev.send_line(STATE_ERROR);
        return;
    }
    // Channel and RSSI are not modelled; the placeholders are part of the
    // fixed reply shape.
    let line = format!(
        "CWJAP:{},{},<channel>,<rssi>,{},{},{},{},{}",
        wifi.ssid,
        wifi.bssid,
        wifi.pci_en,
        wifi.reconn_interval,
        wifi.listen_interval,
        wifi.scan_mode,
        wifi.pmf
    );
    dev.send_line(&line);
    dev.send_line(OK);
}

/// `AT+CWJAP="ssid","pwd"` starts an association. The `WIFI CONNECTED`,
/// `WIFI GOT IP` and final `OK` lines arrive on their own delays while the
/// module keeps serving other commands.
fn join_set(dev: &mut Device, args: &str) {
    if !dev.wifi.can_join() {
        dev.send_line(STATE_ERROR);
        return;
    }
    let parts = split_args(args);
    if parts.len() < 2 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let (ssid, pwd) = match (unquote(parts[0]), unquote(parts[1])) {
        (Some(ssid), Some(pwd)) => (ssid, pwd),
        _ => {
            dev.send_line(PARAM_ERROR);
            return;
        }
    };
    info!("joining SSID {:?}", ssid);
    dev.wifi.ssid = ssid.to_string();
    dev.wifi.pwd = pwd.to_string();
    dev.wifi.state = LinkState::Connecting;
    dev.defer(dev.timing.join_delay, Action::WifiLink);
    dev.defer(dev.timing.got_ip_delay, Action::WifiGotIp);
    dev.defer(dev.timing.join_ok_delay, Action::Send(OK.into()));
}

/// `AT+CWJAP` rejoins the stored AP. Requires an initialized driver and a
/// previously configured SSID; completes immediately.
fn join_execute(dev: &mut Device, _args: &str) {
    if !dev.wifi.init || dev.wifi.ssid.is_empty() {
        dev.send_line(STATE_ERROR);
        return;
    }
    dev.wifi.state = LinkState::Connected;
    dev.send_line("WIFI CONNECTED");
    dev.send_line("WIFI GOT IP");
    dev.send_line(OK);
}

fn leave(dev: &mut Device, _args: &str) {
    if !dev.wifi.can_leave() {
        dev.send_line(STATE_ERROR);
        return;
    }
    info!("leaving SSID {:?}", dev.wifi.ssid);
    dev.wifi.state = LinkState::Disconnected;
    dev.send_line(OK);
}

fn country_query(dev: &mut Device, _args: &str) {
    let wifi = &dev.wifi;
    let line = format!(
        "+CWCOUNTRY:{},{},{},{}",
        wifi.country_policy, wifi.country_code, wifi.start_channel, wifi.total_channel_count
    );
    dev.send_line(&line);
    dev.send_line(OK);
}

fn country_set(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    if parts.len() != 4 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let policy = parts[0].trim().parse::<i64>();
    let code = parts[1].replace('"', "");
    let start = parts[2].trim().parse::<i64>();
    let count = parts[3].trim().parse::<i64>();
    let (Ok(policy), Ok(start), Ok(count)) = (policy, start, count) else {
        dev.send_line(PARAM_ERROR);
        return;
    };
    match dev.wifi.set_country(policy, &code, start, count) {
        Ok(()) => dev.send_line(OK),
        Err(e) => {
            info!("country config rejected: {}", e);
            dev.send_line(PARAM_ERROR);
        }
    }
}

fn systime_query(dev: &mut Device, _args: &str) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let line = format!("+SYSTIMESTAMP:{}", now);
    dev.send_line(&line);
    dev.send_line(OK);
}

fn scan(dev: &mut Device, _args: &str) {
    let after_scan = dev.timing.scan_delay;
    dev.defer(after_scan, Action::Send(SCAN_RESULT.into()));
    dev.defer(
        after_scan + tokio::time::Duration::from_millis(100),
        Action::Send(OK.into()),
    );
}
