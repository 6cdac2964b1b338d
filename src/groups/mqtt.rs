//! MQTT commands. Unlike the WiFi side, nothing here is pretend: publishes,
//! subscriptions and connections go to a real broker through the bridge,
//! and the connect/subscribe replies are parked until the broker answers.

use log::warn;

use crate::command::{split_args, unquote, CommandKind, TypeHandlers, OK, PARAM_ERROR, STATE_ERROR};
use crate::device::{Device, PendingMqtt};
use crate::mqtt::{BridgeError, Scheme, SessionState};

use super::Registration;

pub(crate) fn commands() -> Vec<Registration> {
    vec![
        (
            "AT+MQTTUSERCFG",
            TypeHandlers::new().on(CommandKind::Set, user_config),
        ),
        (
            "AT+MQTTCONNCFG",
            TypeHandlers::new().on(CommandKind::Set, conn_config),
        ),
        (
            "AT+MQTTCONN",
            TypeHandlers::new()
                .on(CommandKind::Query, conn_query)
                .on(CommandKind::Set, connect),
        ),
        (
            "AT+MQTTPUB",
            TypeHandlers::new().on(CommandKind::Set, publish),
        ),
        (
            "AT+MQTTSUB",
            TypeHandlers::new()
                .on(CommandKind::Query, sub_query)
                .on(CommandKind::Set, subscribe),
        ),
        (
            "AT+MQTTPUBRAW",
            TypeHandlers::new().on(CommandKind::Set, publish_raw),
        ),
    ]
}

/// Accept `"value"` or bare `value`; real firmware tolerates both here.
fn dequote(arg: &str) -> &str {
    unquote(arg).unwrap_or(arg)
}

/// `AT+MQTTUSERCFG=<link>,<scheme>,<"client_id">,<"username">,<"password">,
/// <cert_key_ID>,<CA_ID>,<"ca_path">`
fn user_config(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    if parts.len() < 8 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let scheme = parts[1]
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(Scheme::from_code);
    let Some(scheme) = scheme else {
        dev.send_line(PARAM_ERROR);
        return;
    };
    let client_id = dequote(parts[2]).to_string();
    let username = dequote(parts[3]).to_string();
    let password = dequote(parts[4]).to_string();
    let ca_path = dequote(parts[7]).to_string();
    dev.mqtt
        .configure_user(scheme, &client_id, &username, &password, &ca_path);
    dev.send_line(OK);
}

/// `AT+MQTTCONNCFG`: keep-alive, LWT and clean-session knobs. The bridge
/// uses fixed values for all of them, so this only validates and advances
/// the session state.
fn conn_config(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    if parts.len() < 7 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    if dev.mqtt.state == SessionState::SetUserCfg {
        dev.mqtt.state = SessionState::SetConnCfg;
    }
    dev.send_line(OK);
}

fn conn_query(dev: &mut Device, _args: &str) {
    let mqtt = &dev.mqtt;
    let line = format!(
        "+MQTTCONN:0,{},{},\"{}\",{},\"{}\",1",
        mqtt.state.code(),
        mqtt.scheme.code(),
        mqtt.addr.as_deref().unwrap_or(""),
        mqtt.port,
        mqtt.ca_path.as_deref().unwrap_or(""),
    );
    dev.send_line(&line);
    dev.send_line(OK);
}

/// `AT+MQTTCONN=<link>,<"addr">,<port>,<reconnect>`. The reply is parked
/// until the broker's CONNACK (or a connection failure) arrives.
fn connect(dev: &mut Device, args: &str) {
    if dev.pending_reply() {
        dev.send_line(STATE_ERROR);
        return;
    }
    let parts = split_args(args);
    if parts.len() < 4 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let addr = unquote(parts[1]);
    let port = parts[2].trim().parse::<u16>();
    let (Some(addr), Ok(port)) = (addr, port) else {
        dev.send_line(PARAM_ERROR);
        return;
    };
    dev.mqtt.addr = Some(addr.to_string());
    dev.mqtt.port = port;
    match dev.mqtt.start_connect() {
        Ok(()) => dev.set_pending(PendingMqtt::Connect),
        Err(e) => {
            warn!("MQTT connect rejected: {}", e);
            dev.send_line(PARAM_ERROR);
        }
    }
}

/// `AT+MQTTPUB=<link>,<"topic">,<"data">,<qos>,<retain>`
fn publish(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    if parts.len() != 5 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let (topic, data) = match (unquote(parts[1]), unquote(parts[2])) {
        (Some(topic), Some(data)) => (topic.to_string(), data.to_string()),
        _ => {
            dev.send_line(PARAM_ERROR);
            return;
        }
    };
    match dev.mqtt.publish(&topic, data.as_bytes()) {
        Ok(()) => dev.send_line(OK),
        Err(BridgeError::NotConnected) => dev.send_line(STATE_ERROR),
        Err(e) => {
            warn!("MQTT publish failed: {}", e);
            dev.send_line(PARAM_ERROR);
        }
    }
}

fn sub_query(dev: &mut Device, _args: &str) {
    let state = dev.mqtt.state.code();
    let lines: Vec<String> = dev
        .mqtt
        .subscriptions()
        .iter()
        .map(|topic| format!("+MQTTSUB:0,{},\"{}\",0", state, topic))
        .collect();
    for line in lines {
        dev.send_line(&line);
    }
    dev.send_line(OK);
}

/// `AT+MQTTSUB=<link>,<"topic">,<qos>`. The reply is parked until the
/// SUBACK arrives. Duplicate or premature subscriptions fail immediately.
fn subscribe(dev: &mut Device, args: &str) {
    if dev.pending_reply() {
        dev.send_line(STATE_ERROR);
        return;
    }
    let parts = split_args(args);
    if parts.len() != 3 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let Some(topic) = unquote(parts[1]) else {
        dev.send_line(PARAM_ERROR);
        return;
    };
    let topic = topic.to_string();
    match dev.mqtt.subscribe(&topic) {
        Ok(()) => dev.set_pending(PendingMqtt::Subscribe),
        Err(e) => {
            warn!("MQTT subscribe rejected: {}", e);
            dev.send_line(PARAM_ERROR);
        }
    }
}

/// `AT+MQTTPUBRAW=<link>,<"topic">,<length>,<qos>,<retain>` replies `OK`,
/// prompts with `>`, then swallows exactly `length` raw bytes for the
/// payload.
fn publish_raw(dev: &mut Device, args: &str) {
    let parts = split_args(args);
    if parts.len() != 5 {
        dev.send_line(PARAM_ERROR);
        return;
    }
    let topic = dequote(parts[1]).to_string();
    let length = parts[2].trim().parse::<usize>();
    let Ok(length @ 1..) = length else {
        dev.send_line(PARAM_ERROR);
        return;
    };
    dev.send_line(OK);
    dev.send_raw(b">");
    dev.begin_raw_capture(topic, length);
}
