//! Reconnection supervisor for the new-head subscription.
//!
//! ```text
//! Connecting ──► Subscribed ──► Disconnected ──► Reconnecting ──► Subscribed
//!                                    ▲                │
//!                                    └── (failure) ───┘
//! ```
//!
//! While subscribed, every head goes to [`HeightDiscovery::on_new_head`].
//! Once the stream errors or ends nothing is pushed until a reconnect
//! succeeds. A successful reconnect swaps the shared [`ChainHandle`], resyncs
//! the queue against the marker and the new head, and only then subscribes
//! again. Attempts are serialized and retried forever; only a lost store
//! stops the supervisor.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;

use chainqueue_core::chain::{ChainConnector, ChainHandle, HeadStream};
use chainqueue_core::config::IngestConfig;
use chainqueue_core::error::IngestError;

use crate::discovery::HeightDiscovery;

/// Lifecycle of the subscription, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Initial sync and first subscribe in progress.
    Connecting,
    Subscribed,
    /// Subscription lost; waiting for the next attempt.
    Disconnected,
    /// A connect attempt is in flight.
    Reconnecting,
    Stopped,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Capped exponential delay between reconnect attempts. Unbounded attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// `1.0` gives a fixed interval.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            initial: config.reconnect_initial(),
            max: config.reconnect_max(),
            multiplier: config.reconnect_multiplier,
        }
    }

    /// Delay before the `attempt`-th attempt (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exp);
        let cap_ms = self.max.as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }
}

/// Owns the subscription and drives discovery from it.
pub struct HeadSupervisor {
    connector: Arc<dyn ChainConnector>,
    chain: ChainHandle,
    discovery: HeightDiscovery,
    policy: ReconnectPolicy,
    state: watch::Sender<SupervisorState>,
}

impl HeadSupervisor {
    pub fn new(
        connector: Arc<dyn ChainConnector>,
        chain: ChainHandle,
        discovery: HeightDiscovery,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Connecting);
        Self {
            connector,
            chain,
            discovery,
            policy,
            state,
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SupervisorState) {
        let prev = self.state.send_replace(state);
        if prev != state {
            tracing::debug!(from = %prev, to = %state, "supervisor state");
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// Returns `Err` only for [`IngestError::StoreUnavailable`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), IngestError> {
        self.set_state(SupervisorState::Connecting);

        let mut heads = match self.resync_and_subscribe().await {
            Ok(stream) => Some(stream),
            Err(e) if e.is_fatal() => return self.fail(e),
            Err(e) => {
                tracing::warn!(error = %e, "initial subscribe failed");
                None
            }
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Some(mut stream) = heads.take() {
                self.set_state(SupervisorState::Subscribed);
                tokio::select! {
                    _ = shutdown.changed() => break,
                    lost = self.consume(&mut stream) => {
                        if let Err(e) = lost {
                            return self.fail(e);
                        }
                    }
                }
            }

            self.set_state(SupervisorState::Disconnected);
            match self.reconnect(&mut shutdown).await {
                Ok(Some(stream)) => heads = Some(stream),
                Ok(None) => break,
                Err(e) => return self.fail(e),
            }
        }

        self.set_state(SupervisorState::Stopped);
        tracing::info!("head supervisor stopped");
        Ok(())
    }

    fn fail(&self, e: IngestError) -> Result<(), IngestError> {
        tracing::error!(error = %e, "head supervisor stopping on fatal error");
        self.set_state(SupervisorState::Stopped);
        Err(e)
    }

    /// Feed heads to discovery until the stream is lost.
    async fn consume(&self, stream: &mut HeadStream) -> Result<(), IngestError> {
        while let Some(item) = stream.next().await {
            let head = match item {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(error = %e, "new-head subscription lost");
                    return Ok(());
                }
            };
            match self.discovery.on_new_head(head).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(height = head.height, error = %e, "enqueue of new head failed"),
            }
        }
        tracing::warn!("new-head subscription ended");
        Ok(())
    }

    /// Retry until a new subscription is up. `Ok(None)` on shutdown.
    async fn reconnect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<HeadStream>, IngestError> {
        let mut attempt = 0u32;
        loop {
            attempt = attempt.saturating_add(1);
            let delay = self.policy.next_delay(attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

            tokio::select! {
                _ = shutdown.changed() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
            if *shutdown.borrow() {
                return Ok(None);
            }

            self.set_state(SupervisorState::Reconnecting);
            match self.connector.connect().await {
                Ok(client) => {
                    self.chain.replace(client);
                    match self.resync_and_subscribe().await {
                        Ok(stream) => {
                            tracing::info!(attempt, "reconnected to chain");
                            return Ok(Some(stream));
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => tracing::warn!(attempt, error = %e, "resync after reconnect failed"),
                    }
                }
                Err(e) => tracing::warn!(attempt, error = %e, "reconnect failed"),
            }
            self.set_state(SupervisorState::Disconnected);
        }
    }

    /// Catch the queue up to the current head, then subscribe.
    async fn resync_and_subscribe(&self) -> Result<HeadStream, IngestError> {
        let client = self.chain.client();
        let head = client.current_head().await?;
        let report = self.discovery.sync_to(head).await?;
        if let Some((from, to)) = report.range {
            tracing::info!(from, to, batches = report.batches, "queue resynced");
        }
        client.subscribe_new_heads().await
    }
}
