//! Connection lifecycle: connect, retry with backoff, and the frame pump.
//!
//! [`ConnectionResilienceManager`] owns the one live changefeed connection.
//! Each successful handshake starts an epoch: the link is published into
//! the [`ConnectionSlot`] and a dedicated frame-pump task drives it at a
//! fixed cadence. When an epoch's session ends with the manager still
//! running, exactly one reconnection attempt is started.
//!
//! # State machine
//!
//! ```text
//! Disconnected --start/session error--> Connecting --handshake ok--> Connected
//!                                          ^                             |
//!                                          +-------- session error ------+
//! any --shutdown--> Draining --pump drained--> Disconnected
//! ```
//!
//! Reconnection is single-flight: callers serialize on an async mutex, and
//! a caller that finds a live epoch newer than the one it is replacing
//! returns that epoch instead of connecting again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use lodestar_changefeed::{
    ChangefeedLink, ConnectParams, ConnectionCallbacks, Connector, LinkError,
};
use tokio::sync::{Mutex as AsyncMutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::metrics::GatewayMetrics;
use crate::retry::RetrySchedule;
use crate::slot::{ConnectionEpoch, ConnectionSlot};

/// Frame cadence used when the configured rate is unusable.
const FALLBACK_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Upper bound on the post-disconnect drain.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    /// The handshake failed or timed out.
    #[error("connect failed: {0}")]
    Connect(LinkError),

    /// An established session ended.
    #[error("session ended: {0}")]
    Session(LinkError),

    /// Shutdown was requested. Never retried.
    #[error("connection attempt cancelled by shutdown")]
    Cancelled,

    /// Every scheduled retry failed.
    #[error("retry schedule exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: usize,
    },
}

/// Lifecycle state of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// An attempt (or a backoff wait) is in progress.
    Connecting,
    /// A live epoch is published.
    Connected,
    /// Shutdown requested; the frame pump is draining.
    Draining,
}

/// Settings for the resilience manager.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Source endpoint, module, and token.
    pub params: ConnectParams,
    /// Frame pump cadence.
    pub frame_interval: Duration,
    /// Maximum wait for a handshake.
    pub handshake_timeout: Duration,
    /// Maximum time spent ticking a link after requesting disconnect.
    pub drain_timeout: Duration,
    /// Waits between attempts.
    pub schedule: RetrySchedule,
}

impl ResilienceConfig {
    /// Derive settings from the gateway configuration.
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        let frame_interval = Duration::from_secs(1)
            .checked_div(config.changefeed.frame_rate_hz)
            .unwrap_or(FALLBACK_FRAME_INTERVAL);
        Self {
            params: ConnectParams {
                uri: config.changefeed.uri.clone(),
                module: config.changefeed.module.clone(),
                token: config.changefeed.auth_token.clone(),
            },
            frame_interval,
            handshake_timeout: config.changefeed.handshake_timeout(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            schedule: RetrySchedule::standard(),
        }
    }
}

struct PumpHandle {
    epoch_id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type HandshakeSender = Arc<parking_lot::Mutex<Option<oneshot::Sender<Result<String, LinkError>>>>>;

/// Owns the connect, retry, and frame-pump lifecycle.
pub struct ConnectionResilienceManager {
    weak: Weak<Self>,
    connector: Arc<dyn Connector>,
    config: ResilienceConfig,
    slot: Arc<ConnectionSlot>,
    metrics: Arc<GatewayMetrics>,
    shutdown: CancellationToken,
    exhausted: CancellationToken,
    reconnect_lock: AsyncMutex<()>,
    pump: parking_lot::Mutex<Option<PumpHandle>>,
    next_epoch: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

impl std::fmt::Debug for ConnectionResilienceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResilienceManager")
            .field("module", &self.config.params.module)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionResilienceManager {
    /// Create a manager. Nothing connects until [`start`](Self::start).
    ///
    /// `shutdown` is observed by every attempt, backoff wait, and pump.
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ResilienceConfig,
        slot: Arc<ConnectionSlot>,
        metrics: Arc<GatewayMetrics>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (state, _rx) = watch::channel(ConnectionState::Disconnected);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            connector,
            config,
            slot,
            metrics,
            shutdown,
            exhausted: CancellationToken::new(),
            reconnect_lock: AsyncMutex::new(()),
            pump: parking_lot::Mutex::new(None),
            next_epoch: AtomicU64::new(1),
            state,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The slot this manager publishes into.
    pub const fn slot(&self) -> &Arc<ConnectionSlot> {
        &self.slot
    }

    /// Resolves once the retry schedule has been exhausted.
    pub async fn exhausted(&self) {
        self.exhausted.cancelled().await;
    }

    /// Whether the retry schedule has been exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.is_cancelled()
    }

    /// Epoch currently driven by a frame pump, if any.
    pub fn pumped_epoch(&self) -> Option<u64> {
        self.pump.lock().as_ref().map(|p| p.epoch_id)
    }

    /// Connect for the first time, retrying per the schedule.
    pub async fn start(&self) -> Result<ConnectionEpoch, ResilienceError> {
        info!(
            uri = %self.config.params.uri,
            module = %self.config.params.module,
            "Starting changefeed connection"
        );
        self.reconnect(None).await
    }

    /// Establish a new epoch replacing `stale_epoch`.
    ///
    /// Single-flight: concurrent callers wait for the in-flight attempt, and
    /// a caller that then finds a live epoch other than `stale_epoch`
    /// returns it without connecting.
    pub async fn reconnect(
        &self,
        stale_epoch: Option<u64>,
    ) -> Result<ConnectionEpoch, ResilienceError> {
        let _flight = self.reconnect_lock.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        if let Some(current) = self.slot.try_get()
            && Some(current.id()) != stale_epoch
            && current.link().is_active()
        {
            debug!(epoch = current.id(), "Live epoch already established");
            return Ok(current);
        }

        let result = self.connect_with_retry().await;
        match &result {
            Ok(epoch) => {
                self.state.send_replace(ConnectionState::Connected);
                info!(epoch = epoch.id(), "Changefeed connected");
            }
            Err(ResilienceError::Cancelled) => {
                info!("Connection attempts cancelled by shutdown");
            }
            Err(err) => {
                self.state.send_replace(ConnectionState::Disconnected);
                error!(error = %err, fatal = true, "Changefeed connectivity lost permanently");
                self.exhausted.cancel();
            }
        }
        result
    }

    async fn connect_with_retry(&self) -> Result<ConnectionEpoch, ResilienceError> {
        let mut delays = self.config.schedule.delays().iter();
        let mut attempts: usize = 0;
        loop {
            attempts = attempts.saturating_add(1);
            self.stop_pump().await;
            self.state.send_replace(ConnectionState::Connecting);

            let err = match self.attempt(attempts).await {
                Ok(epoch) => return Ok(epoch),
                Err(ResilienceError::Cancelled) => return Err(ResilienceError::Cancelled),
                Err(err) => err,
            };

            let Some(delay) = delays.next() else {
                return Err(ResilienceError::RetriesExhausted { attempts });
            };
            warn!(
                attempt = attempts,
                error = %err,
                retry_in_secs = delay.as_secs(),
                "Connection attempt failed, backing off"
            );
            tokio::select! {
                () = self.shutdown.cancelled() => return Err(ResilienceError::Cancelled),
                () = tokio::time::sleep(*delay) => {}
            }
        }
    }

    async fn attempt(&self, attempt: usize) -> Result<ConnectionEpoch, ResilienceError> {
        self.metrics.record_attempt();
        let epoch_id = self.next_epoch.fetch_add(1, Ordering::SeqCst);
        info!(attempt, epoch = epoch_id, "Connecting to changefeed");

        let (tx, rx) = oneshot::channel();
        let link = self
            .connector
            .connect(&self.config.params, self.callbacks(epoch_id, tx))
            .map_err(ResilienceError::Connect)?;
        self.spawn_pump(epoch_id, Arc::clone(&link));

        let outcome = tokio::select! {
            () = self.shutdown.cancelled() => {
                self.stop_pump().await;
                return Err(ResilienceError::Cancelled);
            }
            outcome = tokio::time::timeout(self.config.handshake_timeout, rx) => outcome,
        };

        let error = match outcome {
            Ok(Ok(Ok(identity))) => {
                self.metrics.record_connect();
                info!(epoch = epoch_id, identity = %identity, "Handshake completed");
                let epoch = ConnectionEpoch::new(epoch_id, link);
                self.slot.set(Some(epoch.clone()));
                return Ok(epoch);
            }
            Ok(Ok(Err(err))) => err,
            Ok(Err(_)) => LinkError::Closed("handshake abandoned".to_owned()),
            Err(_) => LinkError::Handshake(format!(
                "timed out after {}ms",
                self.config.handshake_timeout.as_millis()
            )),
        };
        self.stop_pump().await;
        Err(ResilienceError::Connect(error))
    }

    fn callbacks(
        &self,
        epoch_id: u64,
        tx: oneshot::Sender<Result<String, LinkError>>,
    ) -> ConnectionCallbacks {
        let handshake: HandshakeSender = Arc::new(parking_lot::Mutex::new(Some(tx)));
        let on_ok = Arc::clone(&handshake);
        let weak = self.weak.clone();
        ConnectionCallbacks {
            on_connect: Box::new(move |identity| {
                if let Some(tx) = on_ok.lock().take() {
                    let _ = tx.send(Ok(identity));
                }
            }),
            on_connect_error: Box::new(move |err| {
                if let Some(tx) = handshake.lock().take() {
                    let _ = tx.send(Err(err));
                }
            }),
            on_disconnect: Box::new(move |err| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_disconnect(epoch_id, err);
                }
            }),
        }
    }

    /// React to a session ending. Runs inside the frame pump.
    pub(crate) fn handle_disconnect(&self, epoch_id: u64, err: Option<LinkError>) {
        self.metrics.record_disconnect();
        if self.shutdown.is_cancelled() {
            info!(epoch = epoch_id, "Session closed during shutdown");
            return;
        }
        if self.pumped_epoch() != Some(epoch_id) {
            debug!(epoch = epoch_id, "Ignoring disconnect from stale epoch");
            return;
        }

        let err = ResilienceError::Session(
            err.unwrap_or_else(|| LinkError::Closed("closed by source".to_owned())),
        );
        warn!(epoch = epoch_id, error = %err, "Changefeed session lost, reconnecting");
        self.slot.clear_if(epoch_id);
        self.state.send_replace(ConnectionState::Connecting);

        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            // Failures are logged and surfaced through `exhausted`.
            let _ = manager.reconnect(Some(epoch_id)).await;
        });
    }

    fn spawn_pump(&self, epoch_id: u64, link: Arc<dyn ChangefeedLink>) {
        let cancel = self.shutdown.child_token();
        let pump = FramePump {
            epoch_id,
            link,
            slot: Arc::clone(&self.slot),
            metrics: Arc::clone(&self.metrics),
            frame_interval: self.config.frame_interval,
            drain_timeout: self.config.drain_timeout,
        };
        let task = tokio::spawn(pump.run(cancel.clone()));
        let previous = self.pump.lock().replace(PumpHandle {
            epoch_id,
            cancel,
            task,
        });
        if let Some(previous) = previous {
            // Callers stop the previous pump first; this only guards misuse.
            warn!(epoch = previous.epoch_id, "Replacing a running frame pump");
            previous.cancel.cancel();
        }
    }

    /// Cancel the running frame pump and wait for its teardown.
    async fn stop_pump(&self) {
        let handle = self.pump.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                error!(epoch = handle.epoch_id, error = %e, "Frame pump task failed");
            }
        }
    }

    /// Cancel every attempt, drain the frame pump, and clear the slot.
    pub async fn shutdown(&self) {
        info!("Draining changefeed connection");
        self.state.send_replace(ConnectionState::Draining);
        self.shutdown.cancel();
        let _flight = self.reconnect_lock.lock().await;
        self.stop_pump().await;
        self.slot.set(None);
        self.state.send_replace(ConnectionState::Disconnected);
        info!("Changefeed connection drained");
    }
}

/// Drives one link at a fixed cadence until cancelled.
struct FramePump {
    epoch_id: u64,
    link: Arc<dyn ChangefeedLink>,
    slot: Arc<ConnectionSlot>,
    metrics: Arc<GatewayMetrics>,
    frame_interval: Duration,
    drain_timeout: Duration,
}

impl FramePump {
    async fn run(self, cancel: CancellationToken) {
        self.metrics.pump_started();
        debug!(epoch = self.epoch_id, "Frame pump started");

        while !cancel.is_cancelled() && self.link.is_active() {
            let started = Instant::now();
            if let Err(e) = self.link.frame_tick() {
                warn!(epoch = self.epoch_id, error = %e, "Frame tick failed");
            }
            let remaining = self.frame_interval.saturating_sub(started.elapsed());
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(remaining) => {}
            }
        }

        self.teardown().await;
        self.metrics.pump_stopped();
        debug!(epoch = self.epoch_id, "Frame pump stopped");
    }

    /// Clear the slot, request a graceful close, and tick until the link
    /// reports inactive.
    async fn teardown(&self) {
        self.slot.clear_if(self.epoch_id);
        self.link.disconnect();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while self.link.is_active() {
                if let Err(e) = self.link.frame_tick() {
                    debug!(epoch = self.epoch_id, error = %e, "Tick failed while draining");
                }
                tokio::time::sleep(self.frame_interval).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                epoch = self.epoch_id,
                timeout_ms = self.drain_timeout.as_millis(),
                "Link still active after drain timeout"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use lodestar_changefeed::{HandshakeOutcome, MemoryConnector};

    use super::*;

    fn config(schedule: RetrySchedule) -> ResilienceConfig {
        ResilienceConfig {
            params: ConnectParams {
                uri: "mem://".into(),
                module: "m1".into(),
                token: "t".into(),
            },
            frame_interval: Duration::from_millis(16),
            handshake_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            schedule,
        }
    }

    fn manager(
        connector: &Arc<MemoryConnector>,
        schedule: RetrySchedule,
    ) -> (Arc<ConnectionResilienceManager>, Arc<GatewayMetrics>) {
        let metrics = Arc::new(GatewayMetrics::new());
        let manager = ConnectionResilienceManager::new(
            Arc::clone(connector) as Arc<dyn Connector>,
            config(schedule),
            Arc::new(ConnectionSlot::new()),
            Arc::clone(&metrics),
            CancellationToken::new(),
        );
        (manager, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn first_connect_publishes_epoch() {
        let connector = Arc::new(MemoryConnector::new());
        let (manager, metrics) = manager(&connector, RetrySchedule::standard());

        let epoch = manager.start().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.slot().current_id(), Some(epoch.id()));
        assert_eq!(metrics.frame_pumps_running(), 1);

        manager.shutdown().await;
        assert!(manager.slot().try_get().is_none());
        assert_eq!(metrics.frame_pumps_running(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_follows_schedule_then_gives_up() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_always_fail(true);
        let (manager, metrics) = manager(&connector, RetrySchedule::standard());

        let result = manager.start().await;
        assert!(matches!(
            result,
            Err(ResilienceError::RetriesExhausted { attempts: 29 })
        ));
        assert!(manager.is_exhausted());

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 29);
        let gaps: Vec<Duration> = attempts
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .collect();
        assert_eq!(gaps, RetrySchedule::standard().delays());
        assert_eq!(metrics.frame_pumps_running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let connector = Arc::new(MemoryConnector::new());
        connector.fail_next(2);
        let (manager, _metrics) = manager(&connector, RetrySchedule::standard());

        let started = Instant::now();
        let epoch = manager.start().await.unwrap();
        assert_eq!(connector.attempt_count(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert_eq!(manager.slot().current_id(), Some(epoch.id()));
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connect_is_retried() {
        let connector = Arc::new(MemoryConnector::new());
        connector.push_outcome(HandshakeOutcome::Refuse("bad token".into()));
        let (manager, _metrics) = manager(&connector, RetrySchedule::standard());

        manager.start().await.unwrap();
        assert_eq!(connector.attempt_count(), 2);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reconnects_are_single_flight() {
        let connector = Arc::new(MemoryConnector::new());
        let (manager, metrics) = manager(&connector, RetrySchedule::standard());

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move { manager.reconnect(None).await }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(connector.attempt_count(), 1);
        assert_eq!(metrics.frame_pumps_running(), 1);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn session_error_triggers_one_reconnect() {
        let connector = Arc::new(MemoryConnector::new());
        let (manager, metrics) = manager(&connector, RetrySchedule::standard());
        let first = manager.start().await.unwrap();

        connector.last_link().unwrap().drop_with_error("reset by peer");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(connector.attempt_count(), 2);
        let current = manager.slot().current_id().unwrap();
        assert_ne!(current, first.id());
        assert_eq!(metrics.frame_pumps_running(), 1);
        assert!(!connector.links()[0].is_active());
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_disconnect_does_not_reconnect() {
        let connector = Arc::new(MemoryConnector::new());
        let (manager, _metrics) = manager(&connector, RetrySchedule::standard());
        let first = manager.start().await.unwrap();
        connector.last_link().unwrap().drop_with_error("reset");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempt_count(), 2);

        manager.handle_disconnect(first.id(), Some(LinkError::Transport("late".into())));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempt_count(), 2);
        manager.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_backoff_without_retrying() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_always_fail(true);
        let (manager, _metrics) = manager(&connector, RetrySchedule::standard());

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start().await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        manager.shutdown().await;

        assert!(matches!(task.await.unwrap(), Err(ResilienceError::Cancelled)));
        assert!(!manager.is_exhausted());
        let attempts = connector.attempt_count();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempt_count(), attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_is_a_connect_error() {
        let connector = Arc::new(MemoryConnector::new());
        connector.push_outcome(HandshakeOutcome::Stall);
        let (manager, metrics) = manager(&connector, RetrySchedule::new(vec![]));

        let started = Instant::now();
        let result = manager.start().await;
        assert!(matches!(
            result,
            Err(ResilienceError::RetriesExhausted { attempts: 1 })
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(metrics.frame_pumps_running(), 0);
        assert!(!connector.last_link().unwrap().is_active());
    }
}
