//! Transport-agnostic scope client.
//!
//! `ScopeClient` owns at most one transport at a time. It mirrors the
//! transport's connection state, keeps the latest telemetry and video frame
//! (most recent wins, nothing is queued), routes photos to the single pending
//! capture, and re-publishes everything on a broadcast channel.
//!
//! # Lifecycle
//!
//! ```text
//! connect(mode) ──teardown old──> build(mode) ──> transport.connect()
//!                                    │                  │
//!                              Unsupported         Ok / Err (state Error)
//! disconnect() ──teardown──> Disconnected, frame cleared
//! ```
//!
//! `connect()` and `disconnect()` are serialized by one lock, so two
//! transports are never live at once. Each transport gets a generation number
//! and events from a torn-down generation are ignored.

use parking_lot::{Mutex, RwLock};
use scope_core::protocol::encode_command;
use scope_core::{
    Command, ConnectionState, EventSink, InboundMessage, Result, ScopeError, Telemetry, Transport,
    TransportEvent, TransportMode,
};
use scope_driver_mock::{SimulatedTransport, SimulatorConfig};
use scope_hardware::{SerialConfig, UsbConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, trace, warn};

const EVENT_CAPACITY: usize = 256;

/// What the client publishes to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// New telemetry snapshot.
    Telemetry(Telemetry),
    /// New video frame (base64 JPEG).
    Frame(Arc<str>),
    /// The device reported a fault.
    DeviceError(String),
}

/// Builds a transport for a requested mode.
pub trait TransportFactory: Send + Sync {
    /// Construct, without opening, a transport for `mode`.
    ///
    /// Fails with [`ScopeError::Unsupported`] when the mode is unavailable.
    fn build(&self, mode: TransportMode) -> Result<Box<dyn Transport>>;
}

/// Factory for the built-in serial, USB and simulated transports.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    serial: SerialConfig,
    usb: UsbConfig,
    simulator: SimulatorConfig,
}

impl DefaultTransportFactory {
    #[must_use]
    pub fn new(serial: SerialConfig, usb: UsbConfig, simulator: SimulatorConfig) -> Self {
        Self {
            serial,
            usb,
            simulator,
        }
    }

    /// Whether `mode` can be built in this configuration and build.
    #[must_use]
    pub fn is_supported(&self, mode: TransportMode) -> bool {
        match mode {
            TransportMode::Simulated => true,
            TransportMode::Serial => self.serial.enabled && scope_hardware::serial_supported(),
            TransportMode::Usb => self.usb.enabled && scope_hardware::usb_supported(),
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, mode: TransportMode) -> Result<Box<dyn Transport>> {
        match mode {
            TransportMode::Simulated => Ok(Box::new(SimulatedTransport::new(self.simulator.clone()))),
            TransportMode::Serial => {
                if !self.serial.enabled {
                    return Err(ScopeError::Unsupported(
                        "Serial transport disabled by configuration".into(),
                    ));
                }
                #[cfg(feature = "serial")]
                {
                    Ok(Box::new(scope_hardware::SerialTransport::new(self.serial.clone())))
                }
                #[cfg(not(feature = "serial"))]
                {
                    Err(ScopeError::Unsupported(
                        "Serial transport not supported in this build".into(),
                    ))
                }
            }
            TransportMode::Usb => {
                if !self.usb.enabled {
                    return Err(ScopeError::Unsupported(
                        "USB transport disabled by configuration".into(),
                    ));
                }
                #[cfg(feature = "usb")]
                {
                    Ok(Box::new(scope_hardware::UsbTransport::new(self.usb.clone())))
                }
                #[cfg(not(feature = "usb"))]
                {
                    Err(ScopeError::Unsupported(
                        "USB transport not supported in this build".into(),
                    ))
                }
            }
        }
    }
}

struct PendingPhoto {
    id: u64,
    tx: oneshot::Sender<String>,
}

/// State reachable from transport callbacks.
struct ClientShared {
    generation: AtomicU64,
    state: RwLock<ConnectionState>,
    telemetry: RwLock<Telemetry>,
    latest_frame: RwLock<Option<Arc<str>>>,
    photo_slot: Mutex<Option<PendingPhoto>>,
    next_waiter: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientShared {
    fn publish(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next && next != ConnectionState::Ready {
                return;
            }
            if !state.can_transition_to(next) {
                warn!("Unexpected state transition {} -> {}", *state, next);
            }
            *state = next;
        }
        debug!("Connection state: {}", next);
        self.publish(ClientEvent::StateChanged(next));
    }

    fn handle(&self, generation: u64, event: TransportEvent) {
        if self.generation.load(Ordering::SeqCst) != generation {
            trace!("Dropping event from stale transport: {:?}", event);
            return;
        }
        match event {
            TransportEvent::State(state) => self.set_state(state),
            TransportEvent::Message(message) => self.route(message),
        }
    }

    fn route(&self, message: InboundMessage) {
        match message {
            InboundMessage::VideoFrame { data, .. } => {
                if data.is_empty() {
                    return;
                }
                let frame: Arc<str> = Arc::from(data);
                *self.latest_frame.write() = Some(frame.clone());
                self.publish(ClientEvent::Frame(frame));
            }
            InboundMessage::Photo { data, .. } => {
                if data.is_empty() {
                    return;
                }
                match self.photo_slot.lock().take() {
                    Some(pending) => {
                        if pending.tx.send(data).is_err() {
                            debug!("Photo waiter {} went away before delivery", pending.id);
                        }
                    }
                    None => debug!("Dropping unsolicited photo ({} bytes)", data.len()),
                }
            }
            InboundMessage::Telemetry {
                fps,
                battery,
                connection_status,
                ..
            } => {
                let snapshot = Telemetry::from_report(fps, battery, connection_status.as_deref());
                *self.telemetry.write() = snapshot.clone();
                self.publish(ClientEvent::Telemetry(snapshot));
            }
            InboundMessage::HandshakeAck { .. } => debug!("Handshake acknowledged"),
            InboundMessage::Error { error, .. } => {
                let message = error.unwrap_or_else(|| "unspecified device error".into());
                warn!("Device reported error: {}", message);
                self.publish(ClientEvent::DeviceError(message));
            }
        }
    }
}

/// Pending-photo reservation.
///
/// Holds the client's single photo slot; dropping it releases the slot, so a
/// capture that times out or fails can never leave a stale waiter behind.
pub struct PhotoWaiter {
    shared: Arc<ClientShared>,
    id: u64,
    rx: oneshot::Receiver<String>,
}

impl PhotoWaiter {
    /// Wait for the next PHOTO payload.
    pub async fn recv(&mut self) -> Result<String> {
        (&mut self.rx)
            .await
            .map_err(|_| ScopeError::CaptureAborted("photo slot released".into()))
    }
}

impl Drop for PhotoWaiter {
    fn drop(&mut self) {
        let mut slot = self.shared.photo_slot.lock();
        if slot.as_ref().is_some_and(|p| p.id == self.id) {
            *slot = None;
        }
    }
}

/// The device link client.
pub struct ScopeClient {
    factory: Arc<dyn TransportFactory>,
    connect_lock: tokio::sync::Mutex<()>,
    transport: tokio::sync::RwLock<Option<Box<dyn Transport>>>,
    mode: Mutex<Option<TransportMode>>,
    shared: Arc<ClientShared>,
}

impl ScopeClient {
    /// Client using `factory` to build transports.
    #[must_use]
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factory,
            connect_lock: tokio::sync::Mutex::new(()),
            transport: tokio::sync::RwLock::new(None),
            mode: Mutex::new(None),
            shared: Arc::new(ClientShared {
                generation: AtomicU64::new(0),
                state: RwLock::new(ConnectionState::Disconnected),
                telemetry: RwLock::new(Telemetry::default()),
                latest_frame: RwLock::new(None),
                photo_slot: Mutex::new(None),
                next_waiter: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Open a link of the given kind, replacing any current one.
    ///
    /// Resolves once the handshake has settled. On failure the state stays
    /// `Error` and the client holds no transport.
    pub async fn connect(&self, mode: TransportMode) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.teardown().await {
            self.shared.set_state(ConnectionState::Disconnected);
            *self.shared.latest_frame.write() = None;
        }

        let mut transport = self.factory.build(mode)?;
        *self.mode.lock() = Some(mode);

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = self.shared.clone();
        transport.set_event_sink(EventSink::new(move |event| shared.handle(generation, event)));

        info!("Connecting ({})", mode);
        match transport.connect().await {
            Ok(()) => {
                *self.transport.write().await = Some(transport);
                info!("Connected ({})", mode);
                Ok(())
            }
            Err(e) => {
                if e.is_link_failure() {
                    error!("Connect ({}) failed: {}", mode, e);
                } else {
                    warn!("Connect ({}) failed: {}", mode, e);
                }
                self.shared.generation.fetch_add(1, Ordering::SeqCst);
                if let Err(cleanup) = transport.disconnect().await {
                    debug!("Cleanup after failed connect: {}", cleanup);
                }
                if *self.shared.state.read() != ConnectionState::Error {
                    self.shared.set_state(ConnectionState::Error);
                }
                Err(e)
            }
        }
    }

    /// Tear down the link. A no-op apart from the state reset when already
    /// disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        self.teardown().await;
        self.shared.set_state(ConnectionState::Disconnected);
        *self.shared.latest_frame.write() = None;
        Ok(())
    }

    /// Drop the active transport. Returns whether there was one.
    async fn teardown(&self) -> bool {
        let Some(mut transport) = self.transport.write().await.take() else {
            return false;
        };
        // Invalidate callbacks before the transport reports Disconnected.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }
        debug!("Tore down {} transport", transport.kind());
        true
    }

    /// Encode and send a command. Never queued.
    pub async fn send_command(&self, command: &Command) -> Result<()> {
        let guard = self.transport.read().await;
        let transport = guard.as_ref().ok_or(ScopeError::NotConnected)?;
        let line = encode_command(command)?;
        debug!("Sending {:?}", command.kind());
        transport.send(&line).await
    }

    /// `STREAM_START` at 30 fps, 720p.
    pub async fn start_stream(&self) -> Result<()> {
        self.send_command(&Command::stream_start(30, "720p")).await
    }

    /// `STREAM_STOP`
    pub async fn stop_stream(&self) -> Result<()> {
        self.send_command(&Command::stream_stop()).await
    }

    /// `CAPTURE_PHOTO`. The photo arrives through [`ScopeClient::await_photo`].
    pub async fn capture_photo(&self) -> Result<()> {
        self.send_command(&Command::capture_photo()).await
    }

    /// `SET_BRIGHTNESS {level}`
    pub async fn set_brightness(&self, level: f64) -> Result<()> {
        self.send_command(&Command::set_brightness(level)).await
    }

    /// `SET_FOCUS {value}`
    pub async fn set_focus(&self, value: f64) -> Result<()> {
        self.send_command(&Command::set_focus(value)).await
    }

    /// Reserve the pending-photo slot.
    ///
    /// Fails with [`ScopeError::CaptureInProgress`] if another capture holds it.
    pub fn await_photo(&self) -> Result<PhotoWaiter> {
        let mut slot = self.shared.photo_slot.lock();
        if slot.is_some() {
            return Err(ScopeError::CaptureInProgress);
        }
        let id = self.shared.next_waiter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        *slot = Some(PendingPhoto { id, tx });
        Ok(PhotoWaiter {
            shared: self.shared.clone(),
            id,
            rx,
        })
    }

    /// Observe state, telemetry, frames and device errors.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    #[must_use]
    pub fn telemetry(&self) -> Telemetry {
        self.shared.telemetry.read().clone()
    }

    #[must_use]
    pub fn latest_frame(&self) -> Option<Arc<str>> {
        self.shared.latest_frame.read().clone()
    }

    /// Mode of the most recent `connect()` call.
    #[must_use]
    pub fn last_mode(&self) -> Option<TransportMode> {
        *self.mode.lock()
    }

    /// Whether a transport is currently held.
    pub async fn has_transport(&self) -> bool {
        self.transport.read().await.is_some()
    }

    /// Whether a capture currently holds the photo slot.
    #[must_use]
    pub fn photo_pending(&self) -> bool {
        self.shared.photo_slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ScopeClient {
        ScopeClient::new(Arc::new(DefaultTransportFactory::default()))
    }

    #[tokio::test]
    async fn test_send_without_transport_fails() {
        let c = client();
        assert!(matches!(c.start_stream().await, Err(ScopeError::NotConnected)));
        assert!(matches!(c.set_focus(3.0).await, Err(ScopeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let c = client();
        let mut rx = c.subscribe();
        c.disconnect().await.unwrap();
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert!(c.latest_frame().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_photo_slot_single_waiter() {
        let c = client();
        let first = c.await_photo().unwrap();
        assert!(matches!(c.await_photo(), Err(ScopeError::CaptureInProgress)));
        drop(first);
        assert!(!c.photo_pending());
        assert!(c.await_photo().is_ok());
    }

    #[tokio::test]
    async fn test_photo_routed_to_waiter() {
        let c = client();
        let mut waiter = c.await_photo().unwrap();
        c.shared.handle(
            0,
            TransportEvent::Message(InboundMessage::Photo {
                data: "QUJD".into(),
                size: None,
                timestamp: None,
            }),
        );
        assert_eq!(waiter.recv().await.unwrap(), "QUJD");
        assert!(!c.photo_pending());
    }

    #[test]
    fn test_stale_generation_ignored() {
        let c = client();
        c.shared.generation.store(3, Ordering::SeqCst);
        c.shared.handle(2, TransportEvent::State(ConnectionState::Streaming));
        assert_eq!(c.state(), ConnectionState::Disconnected);
        c.shared.handle(3, TransportEvent::State(ConnectionState::Connecting));
        assert_eq!(c.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_telemetry_and_error_routing() {
        let c = client();
        let mut rx = c.subscribe();
        c.shared.handle(
            0,
            TransportEvent::Message(InboundMessage::Telemetry {
                fps: 30.0,
                battery: 88.0,
                connection_status: None,
                timestamp: None,
            }),
        );
        let t = c.telemetry();
        assert_eq!(t.fps, 30.0);
        assert_eq!(t.connection_status, "unknown");
        assert!(t.last_update.is_some());
        assert!(matches!(rx.try_recv(), Ok(ClientEvent::Telemetry(_))));

        c.shared.handle(
            0,
            TransportEvent::Message(InboundMessage::Error {
                error: Some("lamp failure".into()),
                timestamp: None,
            }),
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::DeviceError("lamp failure".into())
        );
    }

    #[test]
    fn test_factory_rejects_disabled_modes() {
        let factory = DefaultTransportFactory::new(
            SerialConfig {
                enabled: false,
                ..Default::default()
            },
            UsbConfig {
                enabled: false,
                ..Default::default()
            },
            SimulatorConfig::default(),
        );
        assert!(matches!(
            factory.build(TransportMode::Serial),
            Err(ScopeError::Unsupported(_))
        ));
        assert!(matches!(
            factory.build(TransportMode::Usb),
            Err(ScopeError::Unsupported(_))
        ));
        assert!(factory.is_supported(TransportMode::Simulated));
        assert!(!factory.is_supported(TransportMode::Usb));
    }
}
