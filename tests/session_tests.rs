//! End-to-end AT sessions over an in-memory serial stream.
//!
//! Each test boots a full reactor session the way the binary does, with
//! `tokio::io::duplex` standing in for the Unix socket. Paused time makes
//! the multi-second join and sync sequences run instantly.

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use at_wifi_sim::{Device, ResetPin, Runner};

struct Session {
    client: DuplexStream,
    task: JoinHandle<std::io::Result<()>>,
    collected: String,
}

impl Session {
    fn start() -> Self {
        let (client, server) = tokio::io::duplex(4096);
        let device = Device::new().unwrap();
        let reset = ResetPin::new("/nonexistent/gpio_10");
        let task = tokio::spawn(Runner::new(server, device, reset).run());
        Self {
            client,
            task,
            collected: String::new(),
        }
    }

    /// Boot, wait for `ready` and turn echo off.
    async fn start_quiet() -> Self {
        let mut session = Self::start();
        session.read_until("ready\r\n").await;
        session.send("ATE0\r").await;
        session.read_until("OK\r\n").await;
        session.collected.clear();
        session
    }

    async fn send(&mut self, bytes: &str) {
        self.client.write_all(bytes.as_bytes()).await.unwrap();
    }

    /// Read until `needle` appears; returns everything collected since the
    /// last clear.
    async fn read_until(&mut self, needle: &str) -> String {
        let mut buf = [0u8; 512];
        while !self.collected.contains(needle) {
            let n = self.client.read(&mut buf).await.unwrap();
            assert!(n > 0, "session closed while waiting for {:?}", needle);
            self.collected
                .push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        self.collected.clone()
    }

    /// Send one command line and read until its terminal reply token.
    async fn exchange(&mut self, cmd: &str, terminal: &str) -> String {
        self.collected.clear();
        self.send(cmd).await;
        self.send("\r").await;
        self.read_until(terminal).await
    }

    async fn finish(mut self) {
        drop(self.client);
        self.task.await.unwrap().unwrap();
    }
}

// ============================================================================
// Basics
// ============================================================================

#[tokio::test(start_paused = true)]
async fn ping_replies_ok() {
    let mut session = Session::start_quiet().await;
    assert_eq!(session.exchange("AT", "OK\r\n").await, "OK\r\n");
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn boot_banner_comes_before_any_command() {
    let mut session = Session::start();
    let out = session.read_until("ready\r\n").await;
    assert_eq!(out, "ready\r\n");
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_keyword_and_unsupported_kind() {
    let mut session = Session::start_quiet().await;
    assert_eq!(
        session.exchange("AT+NOSUCH", "AT+ERROR: CMD\r\n").await,
        "AT+ERROR: CMD\r\n"
    );
    assert_eq!(
        session.exchange("AT+GMR?", "AT+ERROR: TYPE\r\n").await,
        "AT+ERROR: TYPE\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn echo_repeats_input_bytes_until_disabled() {
    let mut session = Session::start();
    session.read_until("ready\r\n").await;
    session.collected.clear();

    let out = session.exchange("AT", "OK\r\n").await;
    assert!(out.starts_with("AT\r"), "no echo in {:?}", out);

    session.exchange("ATE0", "OK\r\n").await;
    let out = session.exchange("AT", "OK\r\n").await;
    assert_eq!(out, "OK\r\n");
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn command_listing_names_every_family() {
    let mut session = Session::start_quiet().await;
    let out = session.exchange("AT+CMD?", "OK\r\n").await;
    for keyword in ["\"AT\"", "\"AT+CWJAP\"", "\"AT+MQTTCONN\"", "\"AT+CIPSNTPCFG\""] {
        assert!(out.contains(keyword), "{} missing from {:?}", keyword, out);
    }
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn restore_resets_echo_and_reboots() {
    let mut session = Session::start_quiet().await;
    session.exchange("AT+RESTORE", "OK\r\n").await;
    session.collected.clear();
    let out = session.read_until("ready\r\n").await;
    assert_eq!(out, "ready\r\n");
    // Echo is back to its boot default.
    let out = session.exchange("AT", "OK\r\n").await;
    assert!(out.starts_with("AT\r"));
    session.finish().await;
}

// ============================================================================
// WiFi
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cwinit_set_then_query() {
    let mut session = Session::start_quiet().await;
    assert_eq!(session.exchange("AT+CWINIT=1", "OK\r\n").await, "OK\r\n");
    assert_eq!(
        session.exchange("AT+CWINIT?", "OK\r\n").await,
        "+CWINIT:1\r\nOK\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn join_sequence_is_ordered_and_non_blocking() {
    let mut session = Session::start_quiet().await;
    session.collected.clear();
    session.send("AT+CWJAP=\"Devtank Wifi\",\"secret\"\r").await;
    // Still serving commands mid-join.
    let out = session.exchange("AT+CWSTATE?", "OK\r\n").await;
    assert!(out.contains("+CWSTATE:3,Devtank Wifi"));
    assert!(!out.contains("WIFI CONNECTED"));

    session.collected.clear();
    let out = session.read_until("OK\r\n").await;
    let connected = out.find("WIFI CONNECTED\r\n").expect("no WIFI CONNECTED");
    let got_ip = out.find("WIFI GOT IP\r\n").expect("no WIFI GOT IP");
    let ok = out.find("OK\r\n").unwrap();
    assert!(connected < got_ip && got_ip < ok);

    let out = session.exchange("AT+CWSTATE?", "OK\r\n").await;
    assert!(out.contains("+CWSTATE:2,Devtank Wifi"));
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn join_while_connected_is_refused() {
    let mut session = Session::start_quiet().await;
    session.send("AT+CWJAP=\"a\",\"b\"\r").await;
    session.read_until("OK\r\n").await;
    assert_eq!(
        session.exchange("AT+CWJAP=\"a\",\"b\"", "ERROR: STATE\r\n").await,
        "ERROR: STATE\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn leave_without_association_is_refused() {
    let mut session = Session::start_quiet().await;
    assert_eq!(
        session.exchange("AT+CWQAP", "ERROR: STATE\r\n").await,
        "ERROR: STATE\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn country_window_validation_is_atomic() {
    let mut session = Session::start_quiet().await;
    assert_eq!(
        session.exchange("AT+CWCOUNTRY=1,\"GB\",1,13", "OK\r\n").await,
        "OK\r\n"
    );
    assert_eq!(
        session
            .exchange("AT+CWCOUNTRY=1,\"GB\",5,13", "ERROR: PARAM\r\n")
            .await,
        "ERROR: PARAM\r\n"
    );
    // Rejected update left the previous window untouched.
    assert_eq!(
        session.exchange("AT+CWCOUNTRY?", "OK\r\n").await,
        "+CWCOUNTRY:1,GB,1,13\r\nOK\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn mode_rejects_unknown_code() {
    let mut session = Session::start_quiet().await;
    assert_eq!(
        session.exchange("AT+CWMODE=7", "ERROR: PARAM\r\n").await,
        "ERROR: PARAM\r\n"
    );
    assert_eq!(
        session.exchange("AT+CWMODE?", "OK\r\n").await,
        "+CWMODE:2\r\nOK\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn scan_lists_the_visible_ap() {
    let mut session = Session::start_quiet().await;
    let out = session.exchange("AT+CWLAP", "OK\r\n").await;
    assert!(out.contains("+CWLAP:(7,\"Devtank Wifi\",-71,\"08:65:87:ec:a0:e8\","));
    session.finish().await;
}

// ============================================================================
// SNTP
// ============================================================================

#[tokio::test(start_paused = true)]
async fn sntp_config_then_time_updated() {
    let mut session = Session::start_quiet().await;
    session
        .exchange("AT+CIPSNTPCFG=1,0,\"pool.ntp.org\"", "OK\r\n")
        .await;
    session.collected.clear();
    let out = session.read_until("+TIME_UPDATED\r\n").await;
    assert_eq!(out, "+TIME_UPDATED\r\n");
    assert_eq!(
        session.exchange("AT+CIPSNTPCFG?", "OK\r\n").await,
        "+CIPSNTPCFG:1,0,\"pool.ntp.org\"\r\nOK\r\n"
    );
    session.finish().await;
}

// ============================================================================
// MQTT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn subscribe_before_connect_is_a_param_error() {
    let mut session = Session::start_quiet().await;
    session
        .exchange("AT+MQTTUSERCFG=0,1,\"c\",\"u\",\"p\",0,0,\"\"", "OK\r\n")
        .await;
    assert_eq!(
        session
            .exchange("AT+MQTTSUB=0,\"osm/in\",0", "ERROR: PARAM\r\n")
            .await,
        "ERROR: PARAM\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn publish_before_connect_is_a_state_error() {
    let mut session = Session::start_quiet().await;
    session
        .exchange("AT+MQTTUSERCFG=0,1,\"c\",\"u\",\"p\",0,0,\"\"", "OK\r\n")
        .await;
    assert_eq!(
        session
            .exchange("AT+MQTTPUB=0,\"t\",\"hi\",0,0", "ERROR: STATE\r\n")
            .await,
        "ERROR: STATE\r\n"
    );
    session.finish().await;
}

// Real sockets, real time: the refused TCP connect is what resolves the
// parked reply.
#[tokio::test]
async fn connect_to_dead_broker_resolves_with_param_error() {
    let mut session = Session::start_quiet().await;
    session
        .exchange("AT+MQTTUSERCFG=0,1,\"c\",\"u\",\"p\",0,0,\"\"", "OK\r\n")
        .await;
    // Port 1 on localhost: nothing listens there.
    let out = session
        .exchange("AT+MQTTCONN=0,\"127.0.0.1\",1,1", "ERROR: PARAM\r\n")
        .await;
    assert_eq!(out, "ERROR: PARAM\r\n");
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn session_query_reports_configuration() {
    let mut session = Session::start_quiet().await;
    session
        .exchange("AT+MQTTUSERCFG=0,1,\"c\",\"u\",\"p\",0,0,\"\"", "OK\r\n")
        .await;
    assert_eq!(
        session.exchange("AT+MQTTCONN?", "OK\r\n").await,
        "+MQTTCONN:0,1,1,\"\",1883,\"\",1\r\nOK\r\n"
    );
    session.finish().await;
}

#[tokio::test(start_paused = true)]
async fn raw_publish_prompt_and_completion() {
    let mut session = Session::start_quiet().await;
    session.collected.clear();
    session.send("AT+MQTTPUBRAW=0,\"t\",5,0,0\r").await;
    session.read_until(">").await;
    session.collected.clear();
    session.send("hello").await;
    let out = session.read_until("+MQTTPUB:OK\r\n").await;
    // Payload bytes are consumed raw, never echoed or dispatched.
    assert_eq!(out, "+MQTTPUB:OK\r\n");
    session.finish().await;
}
