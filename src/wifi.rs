//! WiFi association state machine.
//!
//! Models the station-side WiFi state of the emulated module: driver init
//! flag, operating mode, association state, credentials and the regulatory
//! country/channel window. All validation is atomic: a rejected update
//! leaves every field untouched.

use std::fmt;

/// Operating mode, ESP-AT numeric codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WifiMode {
    /// Station (client) mode.
    Station = 1,
    /// SoftAP mode.
    SoftAp = 2,
    /// Concurrent SoftAP + station.
    SoftApStation = 3,
}

impl WifiMode {
    /// Parse a numeric mode code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Station),
            2 => Some(Self::SoftAp),
            3 => Some(Self::SoftApStation),
            _ => None,
        }
    }

    /// Numeric code as reported by `AT+CWMODE?`.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Association state, ESP-AT numeric codes as reported by `AT+CWSTATE?`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No connection attempted since boot.
    NotConn = 0,
    /// Associated but no IP address yet.
    NoIp = 1,
    /// Associated with an IP address.
    Connected = 2,
    /// Association in progress.
    Connecting = 3,
    /// Previously connected, now disconnected.
    Disconnected = 4,
}

impl LinkState {
    /// Numeric state code.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Rejected country/channel configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum CountryError {
    /// Policy outside {0, 1}.
    Policy(i64),
    /// Country code not in the ISO-3166 list.
    Code(String),
    /// Start channel outside the valid channel range.
    StartChannel(i64),
    /// Channel count below 1.
    ChannelCount(i64),
    /// `start + count` exceeds the maximum channel.
    Window { start: i64, count: i64 },
}

impl fmt::Display for CountryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(p) => write!(f, "country policy {} not in {{0,1}}", p),
            Self::Code(c) => write!(f, "unknown country code {:?}", c),
            Self::StartChannel(c) => write!(
                f,
                "start channel {} outside {}..={}",
                c,
                WifiState::MIN_CHANNEL,
                WifiState::MAX_CHANNEL
            ),
            Self::ChannelCount(c) => write!(f, "channel count {} below 1", c),
            Self::Window { start, count } => write!(
                f,
                "channel window {}+{} exceeds channel {}",
                start,
                count,
                WifiState::MAX_CHANNEL
            ),
        }
    }
}

impl std::error::Error for CountryError {}

/// Station-side WiFi state.
#[derive(Clone, Debug)]
pub struct WifiState {
    /// Driver initialized (`AT+CWINIT`).
    pub init: bool,
    /// Operating mode.
    pub mode: WifiMode,
    /// Configured SSID (empty until a join).
    pub ssid: String,
    /// Configured password.
    pub pwd: String,
    /// BSSID of the associated AP.
    pub bssid: String,
    /// PCI authentication flag reported by `AT+CWJAP?`.
    pub pci_en: u8,
    /// Reconnection interval in seconds.
    pub reconn_interval: u32,
    /// Listen interval in AP beacon intervals.
    pub listen_interval: u32,
    /// Scan mode flag.
    pub scan_mode: u8,
    /// Join timeout in seconds.
    pub jap_timeout: u32,
    /// Protected management frames flag.
    pub pmf: u8,
    /// Association state.
    pub state: LinkState,
    /// Country policy (0 = follow AP, 1 = static).
    pub country_policy: u8,
    /// Two-letter ISO-3166 country code.
    pub country_code: String,
    /// First channel of the regulatory window.
    pub start_channel: u8,
    /// Number of channels in the window.
    pub total_channel_count: u8,
}

impl Default for WifiState {
    fn default() -> Self {
        Self {
            init: false,
            mode: WifiMode::SoftAp,
            ssid: String::new(),
            pwd: String::new(),
            bssid: String::new(),
            pci_en: 0,
            reconn_interval: 0,
            listen_interval: 3,
            scan_mode: 1,
            jap_timeout: 15,
            pmf: 1,
            state: LinkState::NotConn,
            country_policy: 1,
            country_code: "GB".to_string(),
            start_channel: 1,
            total_channel_count: 13,
        }
    }
}

impl WifiState {
    /// Lowest valid channel.
    pub const MIN_CHANNEL: i64 = 1;
    /// Highest valid channel.
    pub const MAX_CHANNEL: i64 = 14;

    /// Whether a join (`AT+CWJAP=`) is allowed from the current state.
    pub fn can_join(&self) -> bool {
        matches!(self.state, LinkState::NotConn | LinkState::Disconnected)
    }

    /// Whether a disconnect (`AT+CWQAP`) is allowed from the current state.
    pub fn can_leave(&self) -> bool {
        matches!(
            self.state,
            LinkState::Connected | LinkState::Connecting | LinkState::NoIp
        )
    }

    /// Apply a validated country/channel configuration. On any error no
    /// field changes.
    pub fn set_country(
        &mut self,
        policy: i64,
        code: &str,
        start_channel: i64,
        total_channel_count: i64,
    ) -> Result<(), CountryError> {
        if !matches!(policy, 0 | 1) {
            return Err(CountryError::Policy(policy));
        }
        if !COUNTRY_CODES.contains(&code) {
            return Err(CountryError::Code(code.to_string()));
        }
        if !(Self::MIN_CHANNEL..=Self::MAX_CHANNEL).contains(&start_channel) {
            return Err(CountryError::StartChannel(start_channel));
        }
        if total_channel_count < 1 {
            return Err(CountryError::ChannelCount(total_channel_count));
        }
        if start_channel + total_channel_count > Self::MAX_CHANNEL {
            return Err(CountryError::Window {
                start: start_channel,
                count: total_channel_count,
            });
        }
        self.country_policy = policy as u8;
        self.country_code = code.to_string();
        self.start_channel = start_channel as u8;
        self.total_channel_count = total_channel_count as u8;
        Ok(())
    }
}

/// ISO-3166 alpha-2 codes accepted by `AT+CWCOUNTRY`.
pub const COUNTRY_CODES: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX", "AZ",
    "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ", "BR", "BS",
    "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK", "CL", "CM", "CN",
    "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM", "DO", "DZ", "EC", "EE",
    "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR", "GA", "GB", "GD", "GE", "GF",
    "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS", "GT", "GU", "GW", "GY", "HK", "HM",
    "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN", "IO", "IQ", "IR", "IS", "IT", "JE", "JM",
    "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN", "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC",
    "LI", "LK", "LR", "LS", "LT", "LU", "LV", "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK",
    "ML", "MM", "MN", "MO", "MP", "MQ", "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA",
    "NC", "NE", "NF", "NG", "NI", "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG",
    "PH", "PK", "PL", "PM", "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW",
    "SA", "SB", "SC", "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS",
    "ST", "SV", "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO",
    "TR", "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];
