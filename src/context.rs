//! Explicitly constructed application context.
//!
//! One [`AppContext`] is built at startup from [`ScopeConfig`] and passed to
//! whatever drives the link (the CLI today). It owns the client, the
//! reconnect controller and the capture workflows, and tears them down in
//! [`AppContext::shutdown`].

use crate::config::ScopeConfig;
use crate::store::DirectoryStore;
use parking_lot::Mutex;
use scope_client::{
    AutoReconnect, BatchCaptureController, CaptureWorkflow, DefaultTransportFactory, ScopeClient,
    TransportFactory,
};
use scope_core::TransportMode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct AppContext {
    config: ScopeConfig,
    client: Arc<ScopeClient>,
    reconnect: Arc<AutoReconnect>,
    capture: Arc<CaptureWorkflow>,
    store: DirectoryStore,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// Build the context with the built-in transports.
    #[must_use]
    pub fn new(config: ScopeConfig) -> Self {
        let factory = DefaultTransportFactory::new(
            config.connection.serial.clone(),
            config.connection.usb.clone(),
            config.connection.simulator.clone(),
        );
        Self::with_factory(config, Arc::new(factory))
    }

    /// Build the context around a custom transport factory.
    #[must_use]
    pub fn with_factory(config: ScopeConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let client = Arc::new(ScopeClient::new(factory));
        let reconnect = AutoReconnect::new(client.clone(), config.reconnect.policy());
        let capture = Arc::new(
            CaptureWorkflow::new(client.clone())
                .with_timeout(config.capture.timeout())
                .with_thumbnail(config.capture.thumbnail()),
        );
        let store = DirectoryStore::new(config.capture.output_dir.clone());
        Self {
            config,
            client,
            reconnect,
            capture,
            store,
            supervisor: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    #[must_use]
    pub fn client(&self) -> &Arc<ScopeClient> {
        &self.client
    }

    #[must_use]
    pub fn reconnect(&self) -> &Arc<AutoReconnect> {
        &self.reconnect
    }

    #[must_use]
    pub fn capture(&self) -> &Arc<CaptureWorkflow> {
        &self.capture
    }

    #[must_use]
    pub fn store(&self) -> &DirectoryStore {
        &self.store
    }

    /// A batch controller using the configured pacing.
    #[must_use]
    pub fn batch(&self) -> BatchCaptureController {
        BatchCaptureController::new(self.capture.clone())
            .with_inter_shot_delay(self.config.capture.inter_shot_delay())
    }

    /// Connect in `mode` and pin it for reconnects.
    pub async fn connect(&self, mode: TransportMode) -> scope_core::Result<()> {
        self.reconnect.set_mode(mode);
        self.reconnect.reset();
        self.client.connect(mode).await
    }

    /// Start watching for link failures. Calling it twice is a no-op.
    pub fn start_supervision(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_none() {
            *supervisor = Some(self.reconnect.supervise());
            debug!("Reconnect supervision started");
        }
    }

    /// Stop supervision, drop any scheduled retry and close the link.
    pub async fn shutdown(&self) {
        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            handle.abort();
        }
        self.reconnect.reset();
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect during shutdown: {}", e);
        }
        info!("{} shut down", self.config.application.name);
    }
}
