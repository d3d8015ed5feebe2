//! Scripted transports for client-level tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use scope_client::{ScopeClient, TransportFactory};
use scope_core::{ConnectionState, EventSink, Result, ScopeError, Transport, TransportMode};
use scope_driver_mock::{SimulatedTransport, SimulatorConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// What the next built transport does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Connect fails with `DeviceAccess`.
    Fail,
    /// A real simulator.
    Simulated,
    /// Connects, accepts commands, never answers.
    Silent,
}

/// Simulator with default timings and tiny images.
pub fn fast_simulator() -> SimulatorConfig {
    SimulatorConfig {
        frame_width: 32,
        frame_height: 24,
        photo_width: 64,
        photo_height: 36,
        seed: Some(7),
        ..Default::default()
    }
}

/// Builds transports from a queue of plans, then from a fallback.
pub struct ScriptedFactory {
    plans: Mutex<VecDeque<Plan>>,
    fallback: Plan,
    builds: AtomicU32,
    last_sink: Arc<Mutex<Option<EventSink>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new(plans: impl IntoIterator<Item = Plan>, fallback: Plan) -> Arc<Self> {
        Arc::new(Self {
            plans: Mutex::new(plans.into_iter().collect()),
            fallback,
            builds: AtomicU32::new(0),
            last_sink: Arc::new(Mutex::new(None)),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn always(plan: Plan) -> Arc<Self> {
        Self::new([], plan)
    }

    /// Transports built so far (one per `connect()` that got past the
    /// mode check).
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Sink handed to the most recent silent transport.
    pub fn last_sink(&self) -> Option<EventSink> {
        self.last_sink.lock().clone()
    }

    /// Lines written to silent transports.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn build(&self, mode: TransportMode) -> Result<Box<dyn Transport>> {
        if mode == TransportMode::Usb {
            return Err(ScopeError::Unsupported(
                "USB transport not supported in this build".into(),
            ));
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().pop_front().unwrap_or(self.fallback);
        Ok(match plan {
            Plan::Fail => Box::new(FailingTransport {
                sink: EventSink::default(),
            }),
            Plan::Simulated => Box::new(SimulatedTransport::new(fast_simulator())),
            Plan::Silent => Box::new(SilentTransport {
                sink: EventSink::default(),
                shared_sink: self.last_sink.clone(),
                sent: self.sent.clone(),
            }),
        })
    }
}

pub struct FailingTransport {
    sink: EventSink,
}

#[async_trait]
impl Transport for FailingTransport {
    fn kind(&self) -> TransportMode {
        TransportMode::Serial
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        self.sink = sink;
    }

    async fn connect(&mut self) -> Result<()> {
        self.sink.state(ConnectionState::Connecting);
        self.sink.state(ConnectionState::Error);
        Err(ScopeError::DeviceAccess("no scope attached".into()))
    }

    async fn send(&self, _line: &str) -> Result<()> {
        Err(ScopeError::NotConnected)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.sink.state(ConnectionState::Disconnected);
        Ok(())
    }
}

pub struct SilentTransport {
    sink: EventSink,
    shared_sink: Arc<Mutex<Option<EventSink>>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Transport for SilentTransport {
    fn kind(&self) -> TransportMode {
        TransportMode::Serial
    }

    fn set_event_sink(&mut self, sink: EventSink) {
        *self.shared_sink.lock() = Some(sink.clone());
        self.sink = sink;
    }

    async fn connect(&mut self) -> Result<()> {
        self.sink.state(ConnectionState::Connecting);
        self.sink.state(ConnectionState::Handshaking);
        self.sink.state(ConnectionState::Ready);
        Ok(())
    }

    async fn send(&self, line: &str) -> Result<()> {
        self.sent.lock().push(line.to_string());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.sink.state(ConnectionState::Disconnected);
        Ok(())
    }
}

pub fn client_with(factory: &Arc<ScriptedFactory>) -> Arc<ScopeClient> {
    let factory: Arc<dyn TransportFactory> = factory.clone();
    Arc::new(ScopeClient::new(factory))
}
