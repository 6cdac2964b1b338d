//! The emulated module: serial framing, command dispatch, deferred timers
//! and the glue between parked AT replies and broker events.
//!
//! A [`Device`] is a pure state machine over bytes. The reactor feeds it
//! serial input through [`Device::on_byte`] and broker events through
//! [`Device::on_mqtt_event`], drains its output with
//! [`Device::take_output`], and runs its timers via
//! [`Device::next_deadline`] / [`Device::run_due`]. Nothing in here blocks
//! or performs I/O beyond the MQTT client handoff, which keeps the whole
//! command surface drivable from synchronous tests.

use std::fmt::Write as _;
use std::mem;

use log::{debug, info, warn};
use rumqttc::{ConnectionError, Event};
use tokio::time::{Duration, Instant};

use crate::command::{
    classify, HandlerTable, DuplicateKeyword, INVALID_TYPE, PARAM_ERROR,
    NO_COMMAND, OK,
};
use crate::groups;
use crate::mqtt::{MqttBridge, MqttOutcome};
use crate::sntp::SntpState;
use crate::wifi::{LinkState, WifiState};

/// Line terminator appended to outbound replies.
pub const EOL: &[u8] = b"\r\n";

/// Maximum accepted command line length. Longer lines are discarded whole.
pub const MAX_LINE: usize = 4096;

/// `AT+GMR` firmware strings. Faked, matching no real module release.
pub const AT_VERSION: &str = "AT version (FAKE):2.2.0.0";
/// SDK version reported by `AT+GMR`.
pub const SDK_VERSION: &str = "v4.0.1 (FAKE)";
/// Compile timestamp reported by `AT+GMR`.
pub const COMPILE_TIME: &str = "compile time:Oct 16 2023 12:18:22";
/// Binary version reported by `AT+GMR`.
pub const BIN_VERSION: &str = "2.1.0 (FAKE)";

// ============================================================================
// Timing
// ============================================================================

/// Delays for everything the module pretends takes time. All measured from
/// the moment the triggering command line is dispatched.
#[derive(Clone, Debug)]
pub struct Timing {
    /// `AT+CWJAP` to `WIFI CONNECTED`.
    pub join_delay: Duration,
    /// `AT+CWJAP` to `WIFI GOT IP`.
    pub got_ip_delay: Duration,
    /// `AT+CWJAP` to the final `OK`.
    pub join_ok_delay: Duration,
    /// `AT+CWLAP` to the scan results.
    pub scan_delay: Duration,
    /// `AT+CIPSNTPCFG` to `+TIME_UPDATED`.
    pub sntp_sync_delay: Duration,
    /// `AT+MQTTPUBRAW` payload deadline.
    pub raw_publish_timeout: Duration,
    /// Reset deassert (or `AT+RST`) to the `ready` banner.
    pub ready_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            join_delay: Duration::from_millis(2000),
            got_ip_delay: Duration::from_millis(2500),
            join_ok_delay: Duration::from_millis(3000),
            scan_delay: Duration::from_millis(500),
            sntp_sync_delay: Duration::from_millis(3000),
            raw_publish_timeout: Duration::from_millis(1000),
            ready_delay: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// Deferred actions
// ============================================================================

/// Work scheduled for a later instant. Handlers defer these instead of
/// sleeping so the reactor stays responsive between the trigger and the
/// visible effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    /// Emit a line.
    Send(String),
    /// Association complete: state goes to `NoIp`, `WIFI CONNECTED` emitted.
    WifiLink,
    /// DHCP complete: state goes to `Connected`, `WIFI GOT IP` emitted.
    WifiGotIp,
    /// Raw-publish capture deadline.
    RawTimeout,
}

#[derive(Debug)]
struct Deferred {
    due: Instant,
    action: Action,
}

// ============================================================================
// Pending replies and raw capture
// ============================================================================

/// An AT command whose reply is parked until a broker event arrives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingMqtt {
    /// `AT+MQTTCONN` awaiting CONNACK.
    Connect,
    /// `AT+MQTTSUB` awaiting SUBACK.
    Subscribe,
}

/// In-progress `AT+MQTTPUBRAW` payload capture. While active, inbound bytes
/// bypass framing and echo entirely.
#[derive(Debug)]
struct RawCapture {
    topic: String,
    length: usize,
    buf: Vec<u8>,
}

// ============================================================================
// Device
// ============================================================================

/// One emulated module instance, owning all session state.
pub struct Device {
    pub(crate) table: HandlerTable,
    /// WiFi association state.
    pub wifi: WifiState,
    /// SNTP configuration.
    pub sntp: SntpState,
    /// MQTT bridge and session.
    pub mqtt: MqttBridge,
    /// Command echo (`ATE0`/`ATE1`).
    pub echo: bool,
    /// Timing profile.
    pub timing: Timing,
    line: heapless::Vec<u8, MAX_LINE>,
    overflow: bool,
    outbox: Vec<u8>,
    deferred: Vec<Deferred>,
    pending: Option<PendingMqtt>,
    raw: Option<RawCapture>,
}

impl Device {
    /// Build a device with the full command table registered.
    pub fn new() -> Result<Self, DuplicateKeyword> {
        Ok(Self {
            table: HandlerTable::build(groups::all())?,
            wifi: WifiState::default(),
            sntp: SntpState::default(),
            mqtt: MqttBridge::new(),
            echo: true,
            timing: Timing::default(),
            line: heapless::Vec::new(),
            overflow: false,
            outbox: Vec::new(),
            deferred: Vec::new(),
            pending: None,
            raw: None,
        })
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Queue a reply or unsolicited line, terminating it if the caller
    /// didn't.
    pub fn send_line(&mut self, line: &str) {
        debug!(">> {}", line);
        self.outbox.extend_from_slice(line.as_bytes());
        if !line.ends_with("\r\n") {
            self.outbox.extend_from_slice(EOL);
        }
    }

    /// Queue raw bytes with no terminator (the `>` prompt).
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.outbox.extend_from_slice(bytes);
    }

    /// Drain everything queued for the serial line.
    pub fn take_output(&mut self) -> Vec<u8> {
        mem::take(&mut self.outbox)
    }

    /// Whether output is waiting to be flushed.
    pub fn has_output(&self) -> bool {
        !self.outbox.is_empty()
    }

    // ------------------------------------------------------------------------
    // Serial input
    // ------------------------------------------------------------------------

    /// Feed one byte from the serial line.
    ///
    /// During a raw-publish capture, bytes are diverted to the capture
    /// buffer un-echoed. Otherwise bytes are echoed (when enabled) and
    /// accumulated until CR, which dispatches the line. A line longer than
    /// [`MAX_LINE`] is discarded in full.
    pub fn on_byte(&mut self, byte: u8) {
        if self.raw.is_some() {
            self.raw_byte(byte);
            return;
        }
        if self.echo {
            self.outbox.push(byte);
        }
        if byte == b'\r' {
            self.end_line();
        } else if self.line.push(byte).is_err() {
            self.overflow = true;
            self.line.clear();
        }
    }

    fn end_line(&mut self) {
        let buf = mem::take(&mut self.line);
        if mem::take(&mut self.overflow) {
            warn!("discarded over-long command line");
            return;
        }
        // LF left over from the previous line's CRLF.
        let bytes = match buf.first() {
            Some(b'\n') => &buf[1..],
            _ => &buf[..],
        };
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.dispatch(&text);
    }

    fn dispatch(&mut self, line: &str) {
        let cmd = classify(line);
        debug!("<< {} ({:?})", cmd.keyword, cmd.kind);
        let handler = match self.table.lookup(cmd.keyword) {
            None => {
                self.send_line(NO_COMMAND);
                return;
            }
            Some(handlers) => match handlers.get(cmd.kind) {
                None => {
                    self.send_line(INVALID_TYPE);
                    return;
                }
                Some(handler) => handler,
            },
        };
        handler(self, cmd.args);
    }

    // ------------------------------------------------------------------------
    // Deferred actions
    // ------------------------------------------------------------------------

    pub(crate) fn defer(&mut self, delay: Duration, action: Action) {
        self.deferred.push(Deferred {
            due: Instant::now() + delay,
            action,
        });
    }

    /// Earliest deferred deadline, for the reactor's timer arm.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deferred.iter().map(|d| d.due).min()
    }

    /// Run every deferred action due at or before `now`, in deadline order
    /// (insertion order for equal deadlines).
    pub fn run_due(&mut self, now: Instant) {
        loop {
            let next = self
                .deferred
                .iter()
                .enumerate()
                .filter(|(_, d)| d.due <= now)
                .min_by_key(|(i, d)| (d.due, *i))
                .map(|(i, _)| i);
            match next {
                Some(i) => {
                    let deferred = self.deferred.remove(i);
                    self.apply(deferred.action);
                }
                None => break,
            }
        }
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::Send(line) => self.send_line(&line),
            Action::WifiLink => {
                self.wifi.state = LinkState::NoIp;
                self.send_line("WIFI CONNECTED");
            }
            Action::WifiGotIp => {
                self.wifi.state = LinkState::Connected;
                self.send_line("WIFI GOT IP");
            }
            Action::RawTimeout => {
                if self.raw.is_some() {
                    warn!("raw publish deadline hit, publishing partial payload");
                    self.finish_raw();
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Raw publish capture
    // ------------------------------------------------------------------------

    /// Start diverting inbound bytes into a raw-publish payload buffer.
    pub(crate) fn begin_raw_capture(&mut self, topic: String, length: usize) {
        self.raw = Some(RawCapture {
            topic,
            length,
            buf: Vec::with_capacity(length),
        });
        self.defer(self.timing.raw_publish_timeout, Action::RawTimeout);
    }

    fn raw_byte(&mut self, byte: u8) {
        let complete = match &mut self.raw {
            Some(capture) => {
                capture.buf.push(byte);
                capture.buf.len() >= capture.length
            }
            None => false,
        };
        if complete {
            self.finish_raw();
        }
    }

    fn finish_raw(&mut self) {
        if let Some(capture) = self.raw.take() {
            // The capture's deadline must not outlive it: a stale timeout
            // would cut the next capture short.
            self.deferred.retain(|d| d.action != Action::RawTimeout);
            if let Err(e) = self.mqtt.publish(&capture.topic, &capture.buf) {
                warn!("raw publish to {:?} failed: {}", capture.topic, e);
            }
            self.send_line("+MQTTPUB:OK");
        }
    }

    // ------------------------------------------------------------------------
    // Parked MQTT replies
    // ------------------------------------------------------------------------

    /// Park the current command's reply until the matching broker event.
    pub(crate) fn set_pending(&mut self, pending: PendingMqtt) {
        self.pending = Some(pending);
    }

    /// Whether a command reply is parked on a broker event.
    pub fn pending_reply(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one MQTT event-loop result from the reactor.
    pub fn on_mqtt_event(&mut self, event: Result<Event, ConnectionError>) {
        match event {
            Ok(event) => {
                if let Some(outcome) = self.mqtt.handle_event(event) {
                    self.on_mqtt_outcome(outcome);
                }
            }
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                if self.mqtt.on_connection_error() {
                    info!("MQTT connection lost");
                }
                // A parked connect or subscribe can never complete now.
                if self.pending.take().is_some() {
                    self.send_line(PARAM_ERROR);
                }
            }
        }
    }

    fn on_mqtt_outcome(&mut self, outcome: MqttOutcome) {
        match outcome {
            MqttOutcome::ConnAck { ok } => {
                if self.pending == Some(PendingMqtt::Connect) {
                    self.pending = None;
                    self.send_line(if ok { OK } else { PARAM_ERROR });
                }
            }
            MqttOutcome::SubAck { ok } => {
                if self.pending == Some(PendingMqtt::Subscribe) {
                    self.pending = None;
                    self.send_line(if ok { OK } else { PARAM_ERROR });
                }
            }
            MqttOutcome::Message { topic, payload } => {
                let mut line = String::new();
                let _ = write!(
                    line,
                    "+MQTTSUBRECV:0,\"{}\",{},{}",
                    topic,
                    payload.len(),
                    String::from_utf8_lossy(&payload)
                );
                self.send_line(&line);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Restore and listings
    // ------------------------------------------------------------------------

    /// Announce `ready` once the simulated boot completes. Called at
    /// session start, before any command is accepted.
    pub fn schedule_ready(&mut self) {
        self.defer(self.timing.ready_delay, Action::Send("ready".into()));
    }

    /// Return every setting to its boot value and drop the broker
    /// connection. Queued output survives so the triggering command's reply
    /// still goes out.
    pub fn restore(&mut self) {
        self.mqtt.teardown();
        self.wifi = WifiState::default();
        self.sntp = SntpState::default();
        self.mqtt = MqttBridge::new();
        self.echo = true;
        self.line.clear();
        self.overflow = false;
        self.deferred.clear();
        self.pending = None;
        self.raw = None;
    }

    /// `AT+CMD?` listing: one `+CMD:` line per registered keyword with its
    /// supported invocation kinds.
    pub fn command_listing(&self) -> Vec<String> {
        use crate::command::CommandKind::*;
        self.table
            .iter()
            .enumerate()
            .map(|(i, (keyword, handlers))| {
                format!(
                    "+CMD:{},\"{}\",{},{},{},{}",
                    i,
                    keyword,
                    handlers.supports(Test) as u8,
                    handlers.supports(Query) as u8,
                    handlers.supports(Set) as u8,
                    handlers.supports(Execute) as u8,
                )
            })
            .collect()
    }
}
