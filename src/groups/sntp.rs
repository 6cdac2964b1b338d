//! SNTP configuration (`AT+CIPSNTPCFG`). A successful configuration also
//! simulates the first time sync, announcing `+TIME_UPDATED` a few seconds
//! later.

use crate::command::{split_args, unquote, CommandKind, TypeHandlers, OK, PARAM_ERROR};
use crate::device::{Action, Device};

use super::Registration;

pub(crate) fn commands() -> Vec<Registration> {
    vec![(
        "AT+CIPSNTPCFG",
        TypeHandlers::new()
            .on(CommandKind::Query, query)
            .on(CommandKind::Set, set),
    )]
}

fn query(dev: &mut Device, _args: &str) {
    let line = format!(
        "+CIPSNTPCFG:{},{},{}",
        dev.sntp.enabled as u8,
        dev.sntp.timezone,
        dev.sntp.server_list()
    );
    dev.send_line(&line);
    dev.send_line(OK);
}

fn set(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    if parts.len() < 3 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let enable = parts[0].trim().parse::<i64>();
    let timezone = parts[1].trim().parse::<i32>();
    let (Ok(enable @ (0 | 1)), Ok(timezone)) = (enable, timezone) else {
        dev.send_line(PARAM_ERROR);
        return;
    };
    // Validate every server before committing anything.
    let mut servers = Vec::with_capacity(parts.len() - 2);
    for part in &parts[2..] {
        match unquote(part) {
            Some(server) => servers.push(server.to_string()),
            None => {
                dev.send_line(PARAM_ERROR);
                return;
            }
        }
    }
    dev.sntp.enabled = enable == 1;
    dev.sntp.timezone = timezone;
    dev.sntp.servers = servers;
    dev.send_line(OK);
    dev.defer(
        dev.timing.sntp_sync_delay,
        Action::Send("+TIME_UPDATED".into()),
    );
}
