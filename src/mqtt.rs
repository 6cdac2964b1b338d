//! MQTT bridge: translates AT MQTT commands into a real `rumqttc` client
//! and broker events back into session-state changes.
//!
//! The bridge owns the client and its [`EventLoop`]. The event loop's
//! `poll()` future is the seam that lets the client's socket participate in
//! the device's single-threaded reactor: the reactor selects over
//! [`MqttBridge::poll`] alongside the serial transport, and feeds completed
//! events back through [`MqttBridge::handle_event`], which distills them
//! into [`MqttOutcome`]s for the device to turn into AT replies and
//! unsolicited `+MQTTSUBRECV:` lines.
//!
//! Connect and subscribe are split-phase: the AT handler issues the request
//! and parks a pending reply; the reply is produced only when the broker's
//! CONNACK/SUBACK arrives, so the reactor never blocks on the network.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Packet, QoS, SubscribeReasonCode, TlsConfiguration, Transport,
};

// ============================================================================
// Scheme and session state
// ============================================================================

/// Connection scheme codes accepted by `AT+MQTTUSERCFG`.
///
/// All codes are valid configuration; only [`Tcp`](Self::Tcp),
/// [`TlsNoCert`](Self::TlsNoCert) and
/// [`TlsVerifyServer`](Self::TlsVerifyServer) can actually connect; the
/// rest are rejected with a PARAM error at `AT+MQTTCONN` time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// Plain TCP.
    Tcp = 1,
    /// TLS without certificate verification.
    TlsNoCert = 2,
    /// TLS verifying the server certificate against a CA file.
    TlsVerifyServer = 3,
    /// TLS providing a client certificate.
    TlsProvideClient = 4,
    /// TLS with mutual verification.
    TlsBoth = 5,
    /// Plain WebSocket.
    Ws = 6,
    /// WebSocket over TLS, no verification.
    WssNoCert = 7,
    /// WebSocket over TLS, verifying the server.
    WssVerifyServer = 8,
    /// WebSocket over TLS with a client certificate.
    WssProvideClient = 9,
    /// WebSocket over TLS with mutual verification.
    WssBoth = 10,
}

impl Scheme {
    /// Parse a numeric scheme code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Tcp),
            2 => Some(Self::TlsNoCert),
            3 => Some(Self::TlsVerifyServer),
            4 => Some(Self::TlsProvideClient),
            5 => Some(Self::TlsBoth),
            6 => Some(Self::Ws),
            7 => Some(Self::WssNoCert),
            8 => Some(Self::WssVerifyServer),
            9 => Some(Self::WssProvideClient),
            10 => Some(Self::WssBoth),
            _ => None,
        }
    }

    /// Numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the bridge can open a connection with this scheme.
    pub fn is_connectable(self) -> bool {
        matches!(self, Self::Tcp | Self::TlsNoCert | Self::TlsVerifyServer)
    }
}

/// MQTT session state, ESP-AT numeric codes as reported by `AT+MQTTCONN?`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No configuration yet.
    Uninit = 0,
    /// `AT+MQTTUSERCFG` done.
    SetUserCfg = 1,
    /// `AT+MQTTCONNCFG` done.
    SetConnCfg = 2,
    /// Previously connected, now disconnected.
    Disconnected = 3,
    /// TCP/TLS connection established, CONNACK outstanding.
    ConnEst = 4,
    /// Connected, no subscriptions.
    ConnNoSub = 5,
    /// Connected with at least one subscription.
    ConnWithSub = 6,
}

impl SessionState {
    /// Numeric state code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Errors and outcomes
// ============================================================================

/// Bridge operation failure. `NotConnected` maps to a STATE or PARAM reply
/// depending on the command; everything else surfaces as PARAM (the module
/// does not distinguish "broker down" from "bad config" on the wire).
#[derive(Debug)]
pub enum BridgeError {
    /// Operation requires an established connection.
    NotConnected,
    /// A subscription is already awaiting its SUBACK.
    SubscriptionPending(String),
    /// Topic already in the confirmed subscription set.
    AlreadySubscribed(String),
    /// `AT+MQTTUSERCFG` fields incomplete.
    MissingConfig,
    /// Scheme valid but not connectable.
    UnsupportedScheme(Scheme),
    /// CA file could not be read.
    Ca(std::io::Error),
    /// Request could not be handed to the client.
    Client(ClientError),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected to a broker"),
            Self::SubscriptionPending(t) => write!(f, "subscription to {:?} still pending", t),
            Self::AlreadySubscribed(t) => write!(f, "already subscribed to {:?}", t),
            Self::MissingConfig => write!(f, "MQTT user configuration incomplete"),
            Self::UnsupportedScheme(s) => write!(f, "scheme {:?} not supported for connect", s),
            Self::Ca(e) => write!(f, "CA file unreadable: {}", e),
            Self::Client(e) => write!(f, "MQTT client error: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<ClientError> for BridgeError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

/// A broker event distilled for the device. The device turns these into AT
/// replies (for parked connect/subscribe commands) or unsolicited lines.
#[derive(Debug)]
pub enum MqttOutcome {
    /// CONNACK arrived; `ok` is true for return code 0.
    ConnAck {
        /// Accepted by the broker.
        ok: bool,
    },
    /// SUBACK arrived for the pending subscription.
    SubAck {
        /// Every granted reason code was below 128.
        ok: bool,
    },
    /// Inbound publish on a subscribed topic.
    Message {
        /// Topic the message arrived on.
        topic: String,
        /// Raw payload bytes.
        payload: Vec<u8>,
    },
}

// ============================================================================
// Bridge
// ============================================================================

/// MQTT session state plus the live `rumqttc` client.
pub struct MqttBridge {
    /// Configured connection scheme.
    pub scheme: Scheme,
    /// Broker address (set by `AT+MQTTCONN`).
    pub addr: Option<String>,
    /// Broker port.
    pub port: u16,
    /// Client identifier.
    pub client_id: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// CA certificate path (may be empty for non-verifying schemes).
    pub ca_path: Option<String>,
    /// Session state machine.
    pub state: SessionState,
    subscriptions: Vec<String>,
    pending_subscription: Option<String>,
    connected: bool,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
}

impl Default for MqttBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttBridge {
    const KEEP_ALIVE: Duration = Duration::from_secs(60);
    const REQUEST_CAP: usize = 16;

    /// Fresh, unconfigured bridge.
    pub fn new() -> Self {
        Self {
            scheme: Scheme::Tcp,
            addr: None,
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            ca_path: None,
            state: SessionState::Uninit,
            subscriptions: Vec::new(),
            pending_subscription: None,
            connected: false,
            client: None,
            event_loop: None,
        }
    }

    /// Confirmed subscriptions.
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Topic awaiting its SUBACK, if any.
    pub fn pending_subscription(&self) -> Option<&str> {
        self.pending_subscription.as_deref()
    }

    /// Whether a CONNACK-accepted connection is up.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether a client (and its event loop) currently exists.
    pub fn has_client(&self) -> bool {
        self.event_loop.is_some()
    }

    /// Apply `AT+MQTTUSERCFG`. Any existing connection is torn down first;
    /// if one was up, a reconnect with the new settings is started so the
    /// "was connected" intent survives reconfiguration.
    pub fn configure_user(
        &mut self,
        scheme: Scheme,
        client_id: &str,
        username: &str,
        password: &str,
        ca_path: &str,
    ) {
        let was_connected = self.connected;
        self.teardown();

        self.scheme = scheme;
        self.client_id = Some(client_id.to_string());
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self.ca_path = Some(ca_path.to_string());
        info!("MQTT user config: scheme {:?}, client id {:?}", scheme, client_id);

        if was_connected {
            if let Err(e) = self.start_connect() {
                warn!("reconnect with new MQTT settings failed: {}", e);
                self.state = SessionState::SetUserCfg;
            }
        } else {
            self.state = SessionState::SetUserCfg;
        }
    }

    fn is_configured(&self) -> bool {
        self.addr.is_some()
            && self.client_id.is_some()
            && self.username.is_some()
            && self.password.is_some()
            && self.ca_path.is_some()
    }

    fn transport(&self) -> Result<Transport, BridgeError> {
        match self.scheme {
            Scheme::Tcp => Ok(Transport::Tcp),
            Scheme::TlsNoCert => {
                let config = rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerification))
                    .with_no_client_auth();
                Ok(Transport::Tls(TlsConfiguration::Rustls(Arc::new(config))))
            }
            Scheme::TlsVerifyServer => {
                let path = self.ca_path.as_deref().unwrap_or_default();
                let ca = std::fs::read(path).map_err(BridgeError::Ca)?;
                Ok(Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                }))
            }
            other => Err(BridgeError::UnsupportedScheme(other)),
        }
    }

    /// Begin connecting to the configured broker. Returns as soon as the
    /// client exists; the connection itself is driven by the reactor polling
    /// [`poll`](Self::poll), and acceptance is signalled by a later
    /// [`MqttOutcome::ConnAck`].
    pub fn start_connect(&mut self) -> Result<(), BridgeError> {
        if !self.is_configured() {
            return Err(BridgeError::MissingConfig);
        }
        if !self.scheme.is_connectable() {
            return Err(BridgeError::UnsupportedScheme(self.scheme));
        }
        let transport = self.transport()?;

        let addr = self.addr.clone().unwrap_or_default();
        let client_id = self.client_id.clone().unwrap_or_default();
        let username = self.username.clone().unwrap_or_default();
        let password = self.password.clone().unwrap_or_default();

        let mut options = MqttOptions::new(client_id, addr.clone(), self.port);
        options.set_keep_alive(Self::KEEP_ALIVE);
        options.set_transport(transport);
        if !username.is_empty() {
            options.set_credentials(username, password);
        }

        info!("MQTT connecting to {}:{} ({:?})", addr, self.port, self.scheme);
        let (client, event_loop) = AsyncClient::new(options, Self::REQUEST_CAP);
        self.client = Some(client);
        self.event_loop = Some(event_loop);
        self.connected = false;
        self.state = SessionState::ConnEst;
        Ok(())
    }

    /// Publish to a topic. Requires an accepted connection.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }
        let client = self.client.as_ref().ok_or(BridgeError::NotConnected)?;
        debug!("MQTT publish {} ({} bytes)", topic, payload.len());
        client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    /// Request a subscription. The topic is recorded as pending until the
    /// SUBACK arrives; a second request while one is pending, or for an
    /// already-confirmed topic, is rejected.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), BridgeError> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }
        if let Some(pending) = &self.pending_subscription {
            return Err(BridgeError::SubscriptionPending(pending.clone()));
        }
        if self.subscriptions.iter().any(|s| s == topic) {
            return Err(BridgeError::AlreadySubscribed(topic.to_string()));
        }
        let client = self.client.as_ref().ok_or(BridgeError::NotConnected)?;
        client.try_subscribe(topic, QoS::AtMostOnce)?;
        self.pending_subscription = Some(topic.to_string());
        Ok(())
    }

    /// Wait for the next client event. Pends forever while no client
    /// exists, so this can sit unconditionally in the reactor's `select!`.
    pub async fn poll(&mut self) -> Result<Event, ConnectionError> {
        match &mut self.event_loop {
            Some(event_loop) => event_loop.poll().await,
            None => std::future::pending().await,
        }
    }

    /// Digest one broker event into session-state changes and an outcome
    /// for the device.
    pub fn handle_event(&mut self, event: Event) -> Option<MqttOutcome> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("MQTT CONNACK: accepted");
                    self.connected = true;
                    self.state = if self.subscriptions.is_empty() {
                        SessionState::ConnNoSub
                    } else {
                        SessionState::ConnWithSub
                    };
                    Some(MqttOutcome::ConnAck { ok: true })
                } else {
                    warn!("MQTT CONNACK: refused ({:?})", ack.code);
                    self.connected = false;
                    Some(MqttOutcome::ConnAck { ok: false })
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let ok = ack
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                match self.pending_subscription.take() {
                    Some(topic) if ok => {
                        info!("MQTT subscribed to {:?}", topic);
                        self.subscriptions.push(topic);
                        self.state = SessionState::ConnWithSub;
                        Some(MqttOutcome::SubAck { ok: true })
                    }
                    Some(topic) => {
                        warn!("MQTT subscribe to {:?} refused: {:?}", topic, ack.return_codes);
                        Some(MqttOutcome::SubAck { ok: false })
                    }
                    None => None,
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                debug!("MQTT inbound publish on {:?}", publish.topic);
                Some(MqttOutcome::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                })
            }
            _ => None,
        }
    }

    /// Handle an event-loop failure: drop the client so the reactor stops
    /// polling it. Returns whether an accepted connection was lost.
    pub fn on_connection_error(&mut self) -> bool {
        let was_connected = self.connected;
        self.teardown();
        if was_connected {
            self.state = SessionState::Disconnected;
        }
        was_connected
    }

    /// Drop the client and any in-flight subscription. Confirmed
    /// subscriptions are kept: they are session configuration, re-applied
    /// state on the module is only cleared by a restore.
    pub fn teardown(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        self.event_loop = None;
        self.connected = false;
        self.pending_subscription = None;
    }
}

// ============================================================================
// TLS without verification (scheme 2)
// ============================================================================

/// Certificate verifier that accepts anything, for the TLS-no-cert-check
/// scheme. The emulated module's scheme 2 explicitly skips verification.
#[derive(Debug)]
struct NoVerification;

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme::*;
        vec![
            RSA_PKCS1_SHA1,
            ECDSA_SHA1_Legacy,
            RSA_PKCS1_SHA256,
            ECDSA_NISTP256_SHA256,
            RSA_PKCS1_SHA384,
            ECDSA_NISTP384_SHA384,
            RSA_PKCS1_SHA512,
            ECDSA_NISTP521_SHA512,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            ED25519,
            ED448,
        ]
    }
}
