//! Automatic reconnection after link failures.
//!
//! # Retry cycle
//!
//! ```text
//! Error ──supervise──> attempt_reconnect()
//!                          │
//!            attempts < max? ──no──> MaxAttemptsReached (terminal)
//!                          │yes
//!                   Reconnecting (k/max) ──> client.connect(mode)
//!                          │                      │
//!                       success                failure
//!                          ▼                      ▼
//!               counter = 0, Reconnected   Retrying in 3s.. 2s.. 1s..
//!                                                 │
//!                                         next attempt (loop)
//! ```
//!
//! The delay is fixed and there is no jitter. At most one retry is scheduled
//! at a time; `reset()` and `cancel()` drop it.

use crate::client::{ClientEvent, ScopeClient};
use parking_lot::Mutex;
use scope_core::{ConnectionState, TransportMode};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const STATUS_CAPACITY: usize = 64;

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
    /// Whether the supervisor retries at all.
    pub enabled: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(3000),
            enabled: true,
        }
    }
}

impl ReconnectConfig {
    /// Whether another attempt may follow `attempts` made so far.
    #[must_use]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Whole seconds announced by the countdown (rounded up).
    #[must_use]
    pub fn countdown_seconds(&self) -> u64 {
        self.delay.as_secs() + u64::from(self.delay.subsec_nanos() > 0)
    }
}

/// User-facing reconnect progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectStatus {
    Attempting { attempt: u32, max: u32 },
    Reconnected,
    RetryingIn { seconds: u64 },
    MaxAttemptsReached,
    Cancelled,
}

impl fmt::Display for ReconnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempting { attempt, max } => write!(f, "Reconnecting ({}/{})...", attempt, max),
            Self::Reconnected => f.write_str("Reconnected successfully"),
            Self::RetryingIn { seconds } => write!(f, "Retrying in {}s...", seconds),
            Self::MaxAttemptsReached => f.write_str("Max reconnection attempts reached"),
            Self::Cancelled => f.write_str("Reconnection cancelled"),
        }
    }
}

#[derive(Default)]
struct RetryState {
    attempts: u32,
    /// Cancel side of the scheduled retry, if any.
    pending: Option<oneshot::Sender<()>>,
    in_flight: bool,
}

enum Outcome {
    Connected,
    Exhausted,
    /// Failed; carries the cancel receiver when a retry was armed.
    Failed(Option<oneshot::Receiver<()>>),
}

/// Reconnect controller wrapping a shared [`ScopeClient`].
pub struct AutoReconnect {
    client: Arc<ScopeClient>,
    config: ReconnectConfig,
    mode: Mutex<Option<TransportMode>>,
    state: Mutex<RetryState>,
    status: broadcast::Sender<ReconnectStatus>,
    last_status: Mutex<Option<ReconnectStatus>>,
}

impl AutoReconnect {
    #[must_use]
    pub fn new(client: Arc<ScopeClient>, config: ReconnectConfig) -> Arc<Self> {
        let (status, _) = broadcast::channel(STATUS_CAPACITY);
        Arc::new(Self {
            client,
            config,
            mode: Mutex::new(None),
            state: Mutex::new(RetryState::default()),
            status,
            last_status: Mutex::new(None),
        })
    }

    /// Pin the transport mode used for retries.
    ///
    /// Without one, the client's last connect mode is used.
    pub fn set_mode(&self, mode: TransportMode) {
        *self.mode.lock() = Some(mode);
    }

    fn effective_mode(&self) -> TransportMode {
        let pinned = *self.mode.lock();
        pinned.or_else(|| self.client.last_mode()).unwrap_or_default()
    }

    #[must_use]
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Attempts made since the last success or reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Whether a retry is currently scheduled.
    #[must_use]
    pub fn retry_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.in_flight && state.pending.is_none()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<ReconnectStatus> {
        self.status.subscribe()
    }

    #[must_use]
    pub fn last_status(&self) -> Option<ReconnectStatus> {
        self.last_status.lock().clone()
    }

    fn publish(&self, status: ReconnectStatus) {
        info!("{}", status);
        *self.last_status.lock() = Some(status.clone());
        let _ = self.status.send(status);
    }

    /// Try to reconnect now.
    ///
    /// Returns `true` on success. A failure schedules the next retry (if any
    /// remain) and returns `false`; exhaustion is terminal until
    /// [`reset`](Self::reset).
    pub async fn attempt_reconnect(self: &Arc<Self>) -> bool {
        self.clear_pending();
        match self.try_once().await {
            Outcome::Connected => true,
            Outcome::Exhausted => false,
            Outcome::Failed(retry) => {
                if let Some(cancel) = retry {
                    let this = self.clone();
                    tokio::spawn(async move { this.retry_loop(cancel).await });
                }
                false
            }
        }
    }

    async fn try_once(&self) -> Outcome {
        let attempt = {
            let mut state = self.state.lock();
            if !self.config.should_retry(state.attempts) {
                drop(state);
                self.publish(ReconnectStatus::MaxAttemptsReached);
                return Outcome::Exhausted;
            }
            state.attempts += 1;
            state.in_flight = true;
            state.attempts
        };
        self.publish(ReconnectStatus::Attempting {
            attempt,
            max: self.config.max_attempts,
        });

        let mode = self.effective_mode();
        match self.client.connect(mode).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.in_flight = false;
                    state.attempts = 0;
                }
                self.publish(ReconnectStatus::Reconnected);
                Outcome::Connected
            }
            Err(e) => {
                warn!("Reconnect attempt {} ({}) failed: {}", attempt, mode, e);
                let mut state = self.state.lock();
                state.in_flight = false;
                if !self.config.should_retry(state.attempts) {
                    drop(state);
                    self.publish(ReconnectStatus::MaxAttemptsReached);
                    return Outcome::Failed(None);
                }
                if state.pending.is_some() {
                    return Outcome::Failed(None);
                }
                let (tx, rx) = oneshot::channel();
                state.pending = Some(tx);
                Outcome::Failed(Some(rx))
            }
        }
    }

    async fn retry_loop(self: Arc<Self>, mut cancel: oneshot::Receiver<()>) {
        loop {
            if !self.countdown(&mut cancel).await {
                debug!("Scheduled reconnect cancelled");
                return;
            }
            {
                let mut state = self.state.lock();
                // Our sender is still installed only while the channel is empty.
                if !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                    return;
                }
                state.pending = None;
            }
            match self.try_once().await {
                Outcome::Failed(Some(next)) => cancel = next,
                _ => return,
            }
        }
    }

    /// Announce the remaining seconds once per second until the delay
    /// elapses. Returns `false` if cancelled first.
    async fn countdown(&self, cancel: &mut oneshot::Receiver<()>) -> bool {
        let start = Instant::now();
        let deadline = start + self.config.delay;
        let seconds = self.config.countdown_seconds();
        for elapsed in 0..seconds {
            self.publish(ReconnectStatus::RetryingIn {
                seconds: seconds - elapsed,
            });
            let tick = (start + Duration::from_secs(elapsed + 1)).min(deadline);
            tokio::select! {
                _ = sleep_until(tick) => {}
                _ = &mut *cancel => return false,
            }
        }
        true
    }

    fn clear_pending(&self) {
        if let Some(pending) = self.state.lock().pending.take() {
            let _ = pending.send(());
        }
    }

    /// Drop any scheduled retry and zero the counter.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.attempts = 0;
        if let Some(pending) = state.pending.take() {
            let _ = pending.send(());
        }
    }

    /// [`reset`](Self::reset) and report the cancellation.
    pub fn cancel(&self) {
        self.reset();
        self.publish(ReconnectStatus::Cancelled);
    }

    /// Watch the client and start reconnecting whenever it enters `Error`
    /// while no attempt is running or scheduled.
    ///
    /// The watcher ends when the controller is dropped or the client's event
    /// channel closes.
    pub fn supervise(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.client.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ClientEvent::StateChanged(ConnectionState::Error)) => {
                        let Some(this) = weak.upgrade() else { break };
                        if !this.config.enabled {
                            debug!("Link failed; auto-reconnect disabled");
                        } else if !this.config.should_retry(this.attempts()) {
                            debug!("Link failed; reconnect attempts exhausted");
                        } else if this.is_idle() {
                            this.attempt_reconnect().await;
                        }
                    }
                    Ok(_) => {
                        if weak.strong_count() == 0 {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Reconnect supervisor skipped {} client events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for AutoReconnect {
    fn drop(&mut self) {
        if let Some(pending) = self.state.get_mut().pending.take() {
            let _ = pending.send(());
        }
    }
}
