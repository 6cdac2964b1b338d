//! SNTP configuration state (`AT+CIPSNTPCFG`).

/// SNTP time-sync settings.
#[derive(Clone, Debug)]
pub struct SntpState {
    /// Whether SNTP sync is enabled.
    pub enabled: bool,
    /// UTC offset in hours.
    pub timezone: i32,
    /// Configured server hostnames, in priority order.
    pub servers: Vec<String>,
}

impl Default for SntpState {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: 0,
            servers: Vec::new(),
        }
    }
}

impl SntpState {
    /// Server list formatted for the `AT+CIPSNTPCFG?` reply.
    pub fn server_list(&self) -> String {
        self.servers
            .iter()
            .map(|s| format!("\"{}\"", s))
            .collect::<Vec<_>>()
            .join(",")
    }
}
