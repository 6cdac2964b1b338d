//! Standalone module server.
//!
//! Binds the serial Unix socket and serves one firmware session at a time,
//! each with a fresh device, so reconnecting is a power cycle.

use std::env;
use std::fs;

use anyhow::Context;
use log::{info, warn};
use tokio::net::UnixListener;
use tokio::time::Duration;

use at_wifi_sim::{Config, Device, ResetPin, Runner};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = match env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    if let Some(dir) = config.socket_path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating socket directory {}", dir.display()))?;
    }
    // A stale socket from a previous run blocks the bind.
    if config.socket_path.exists() {
        fs::remove_file(&config.socket_path)
            .with_context(|| format!("removing stale socket {}", config.socket_path.display()))?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("binding {}", config.socket_path.display()))?;
    info!("listening on {}", config.socket_path.display());

    loop {
        let (stream, _) = listener.accept().await.context("accepting connection")?;
        info!("firmware connected");
        let mut device = Device::new()?;
        device.echo = config.echo;
        let reset = ResetPin::with_boot_delay(
            &config.reset_pin_path,
            Duration::from_millis(config.boot_delay_ms),
        );
        match Runner::new(stream, device, reset).run().await {
            Ok(()) => info!("firmware disconnected"),
            Err(e) => warn!("session failed: {}", e),
        }
    }
}
