//! The session reactor: one task multiplexing the serial stream, the reset
//! pin, the device's deferred timers and the MQTT event loop.
//!
//! Everything the module does happens here, sequentially. Each loop
//! iteration flushes queued output, then waits for exactly one wake-up and
//! hands it to the device. The MQTT event loop participates directly via
//! [`MqttBridge::poll`](crate::mqtt::MqttBridge::poll), so broker traffic
//! never needs a thread or channel of its own.

use std::io;

use log::{debug, info};
use rumqttc::{ConnectionError, Event};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::device::Device;
use crate::reset::{ResetPin, POLL_PERIOD};

enum Wake {
    Serial(usize),
    ResetTick,
    Deferred,
    Mqtt(Result<Event, ConnectionError>),
}

/// One serial session over `S`, driving one [`Device`].
pub struct Runner<S> {
    stream: S,
    device: Device,
    reset: ResetPin,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Runner<S> {
    /// Wrap a connected stream. The device boots when [`run`](Self::run)
    /// starts.
    pub fn new(stream: S, device: Device, reset: ResetPin) -> Self {
        Self {
            stream,
            device,
            reset,
        }
    }

    /// Serve the session until the peer hangs up.
    pub async fn run(mut self) -> io::Result<()> {
        self.device.schedule_ready();
        let mut reset_ticks = time::interval(POLL_PERIOD);
        reset_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut buf = [0u8; 256];

        loop {
            if self.device.has_output() {
                let out = self.device.take_output();
                self.stream.write_all(&out).await?;
                self.stream.flush().await?;
            }

            // Arm bodies only name the wake-up; all device mutation happens
            // below, outside the select's borrows.
            let wake = {
                let deadline = self.device.next_deadline();
                tokio::select! {
                    n = self.stream.read(&mut buf) => Wake::Serial(n?),
                    _ = reset_ticks.tick() => Wake::ResetTick,
                    _ = sleep_until_opt(deadline) => Wake::Deferred,
                    event = self.device.mqtt.poll() => Wake::Mqtt(event),
                }
            };

            match wake {
                Wake::Serial(0) => {
                    debug!("serial peer hung up");
                    return Ok(());
                }
                Wake::Serial(n) => {
                    for &byte in &buf[..n] {
                        self.device.on_byte(byte);
                    }
                }
                Wake::ResetTick => {
                    if self.reset.poll(Instant::now()) {
                        info!("hardware reset");
                        self.device.restore();
                        self.device.send_line("ready");
                    }
                }
                Wake::Deferred => self.device.run_due(Instant::now()),
                Wake::Mqtt(event) => self.device.on_mqtt_event(event),
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
