//! In-process stand-in for the scope firmware.
//!
//! Follows the same state sequence as the physical links and answers the same
//! commands, so everything above the transport runs unchanged without a
//! device attached.
//!
//! Timers owned here:
//! - telemetry ticker, started once the link is ready
//! - frame ticker, while streaming
//! - one delayed task per pending photo
//!
//! `disconnect()` stops all of them before reporting `Disconnected`.

use crate::common::{MockRng, TimingConfig};
use crate::pattern::{self, Optics, Palette, FRAME_PALETTE, PHOTO_PALETTE};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use scope_core::protocol::decode_command;
use scope_core::{
    CommandType, ConnectionState, EventSink, InboundMessage, Result, ScopeError, Transport,
    TransportMode,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Simulator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Delays and periods.
    pub timing: TimingConfig,
    /// Live-feed frame width.
    pub frame_width: u32,
    /// Live-feed frame height.
    pub frame_height: u32,
    /// Live-feed JPEG quality.
    pub frame_quality: u8,
    /// Photo width.
    pub photo_width: u32,
    /// Photo height.
    pub photo_height: u32,
    /// Photo JPEG quality.
    pub photo_quality: u8,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            frame_width: 640,
            frame_height: 480,
            frame_quality: 70,
            photo_width: 1280,
            photo_height: 720,
            photo_quality: 90,
            seed: None,
        }
    }
}

/// State shared with the ticker tasks.
struct Device {
    config: SimulatorConfig,
    sink: EventSink,
    rng: MockRng,
    streaming: AtomicBool,
    optics: Mutex<Optics>,
}

impl Device {
    fn snapshot(&self, width: u32, height: u32, palette: &Palette, quality: u8) -> Option<String> {
        let optics = *self.optics.lock();
        let img = pattern::render(width, height, palette, optics, self.rng.next_u64());
        match pattern::encode_jpeg(&img, quality) {
            Ok(jpeg) => Some(STANDARD.encode(jpeg)),
            Err(e) => {
                warn!("Simulator image encode failed: {}", e);
                None
            }
        }
    }

    fn send_telemetry(&self) {
        let streaming = self.streaming.load(Ordering::SeqCst);
        self.sink.message(InboundMessage::Telemetry {
            fps: if streaming { 30.0 } else { 0.0 },
            battery: 85.0 + self.rng.next_f64() * 10.0,
            connection_status: Some("connected".to_string()),
            timestamp: Some(now_millis()),
        });
    }

    fn send_frame(&self) {
        let cfg = &self.config;
        if let Some(data) =
            self.snapshot(cfg.frame_width, cfg.frame_height, &FRAME_PALETTE, cfg.frame_quality)
        {
            self.sink.message(InboundMessage::VideoFrame {
                data,
                timestamp: Some(now_millis()),
            });
        }
    }

    fn send_photo(&self) {
        let cfg = &self.config;
        if let Some(data) =
            self.snapshot(cfg.photo_width, cfg.photo_height, &PHOTO_PALETTE, cfg.photo_quality)
        {
            let size = data.len() as u64;
            self.sink.message(InboundMessage::Photo {
                data,
                size: Some(size),
                timestamp: Some(now_millis()),
            });
        }
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Simulated scope link.
pub struct SimulatedTransport {
    config: SimulatorConfig,
    sink: EventSink,
    seed: Option<u64>,
    device: Option<Arc<Device>>,
    telemetry: Option<JoinHandle<()>>,
    frames: Mutex<Option<JoinHandle<()>>>,
    photos: Mutex<JoinSet<()>>,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            seed: config.seed,
            config,
            sink: EventSink::default(),
            device: None,
            telemetry: None,
            frames: Mutex::new(None),
            photos: Mutex::new(JoinSet::new()),
        }
    }

    fn device(&self) -> Result<&Arc<Device>> {
        self.device.as_ref().ok_or(ScopeError::NotConnected)
    }

    fn start_stream(&self, device: &Arc<Device>) {
        if device.streaming.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Simulator stream started");
        device.sink.state(ConnectionState::Streaming);

        let period = device.config.timing.frame_interval();
        let device = device.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                device.send_frame();
            }
        });
        if let Some(old) = self.frames.lock().replace(task) {
            old.abort();
        }
    }

    fn stop_stream(&self, device: &Device) {
        device.streaming.store(false, Ordering::SeqCst);
        if let Some(task) = self.frames.lock().take() {
            task.abort();
            info!("Simulator stream stopped");
        }
        device.sink.state(ConnectionState::Ready);
    }

    fn schedule_photo(&self, device: &Arc<Device>) {
        let delay = device.config.timing.photo_delay();
        let device = device.clone();
        let mut photos = self.photos.lock();
        while photos.try_join_next().is_some() {}
        photos.spawn(async move {
            tokio::time::sleep(delay).await;
            device.send_photo();
        });
    }

    fn halt_timers(&mut self) {
        if let Some(task) = self.telemetry.take() {
            task.abort();
        }
        if let Some(task) = self.frames.lock().take() {
            task.abort();
        }
        self.photos.lock().abort_all();
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportMode {
        TransportMode::Simulated
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    async fn connect(&mut self) -> Result<()> {
        self.halt_timers();
        let timing = self.config.timing;

        self.sink.state(ConnectionState::Connecting);
        tokio::time::sleep(timing.connect_delay()).await;
        self.sink.state(ConnectionState::Handshaking);
        tokio::time::sleep(timing.handshake_delay()).await;

        self.sink.message(InboundMessage::HandshakeAck {
            timestamp: Some(now_millis()),
        });

        let device = Arc::new(Device {
            config: self.config.clone(),
            sink: self.sink.clone(),
            rng: MockRng::new(self.seed),
            streaming: AtomicBool::new(false),
            optics: Mutex::new(Optics::default()),
        });
        self.device = Some(device.clone());
        self.sink.state(ConnectionState::Ready);
        info!("Simulator connected");

        let period = timing.telemetry_interval();
        self.telemetry = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                device.send_telemetry();
            }
        }));
        Ok(())
    }

    async fn send(&self, line: &str) -> Result<()> {
        let device = self.device()?;
        let Some(cmd) = decode_command(line) else {
            warn!("Simulator ignoring unparseable command line");
            return Ok(());
        };
        debug!("Simulator received {:?}", cmd.kind());

        match cmd.kind() {
            CommandType::Handshake => {}
            CommandType::StreamStart => self.start_stream(device),
            CommandType::StreamStop => self.stop_stream(device),
            CommandType::CapturePhoto => self.schedule_photo(device),
            CommandType::SetBrightness => {
                if let Some(level) = cmd.param("level").and_then(|v| v.as_f64()) {
                    device.optics.lock().brightness = level;
                }
            }
            CommandType::SetFocus => {
                if let Some(value) = cmd.param("value").and_then(|v| v.as_f64()) {
                    device.optics.lock().focus = value;
                }
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.halt_timers();
        if let Some(device) = self.device.take() {
            device.streaming.store(false, Ordering::SeqCst);
            info!("Simulator disconnected");
        }
        self.sink.state(ConnectionState::Disconnected);
        Ok(())
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.halt_timers();
    }
}
