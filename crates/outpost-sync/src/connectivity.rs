//! # Connectivity Monitor
//!
//! Tracks whether the remote API is reachable and gates the sync processor.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Connectivity State Machine                          │
//! │                                                                         │
//! │                     network available                                   │
//! │   ┌─────────┐ ──────────────────────────► ┌──────────┐                 │
//! │   │ Offline │                             │ Checking │                 │
//! │   └─────────┘ ◄────────────────────────── └──────────┘                 │
//! │     ▲    ▲          probe failed               │   ▲                    │
//! │     │    │                      probe ok       │   │ suspect            │
//! │     │    │                                     ▼   │ (failed send)      │
//! │     │    │  N consecutive probe failures  ┌──────────┐                 │
//! │     │    └─────────────────────────────── │  Online  │                 │
//! │     │                                     └──────────┘                 │
//! │     └──── network unavailable (from any state, immediately)            │
//! │                                                                         │
//! │  Only Online lets the processor dispatch. The periodic probe runs in   │
//! │  every state so an Offline client notices the API coming back.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use url::Url;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use outpost_core::ConnectivityState;

// =============================================================================
// Health Probe
// =============================================================================

/// Answers "is the remote API healthy right now?".
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probes the API's health endpoint with a short timeout.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpHealthProbe {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.connectivity.probe_timeout())
            .build()?;

        Ok(HttpHealthProbe {
            client,
            url: config.health_url()?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

// =============================================================================
// Connectivity Monitor
// =============================================================================

/// Owns the connectivity state and publishes every change.
pub struct ConnectivityMonitor {
    state_tx: watch::Sender<ConnectivityState>,
    probe: Arc<dyn HealthProbe>,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    /// Bumped by `network_unavailable` so probes started earlier are ignored.
    epoch: AtomicU64,
    interval: Duration,
}

impl ConnectivityMonitor {
    /// Creates a monitor in the `Offline` state.
    pub fn new(probe: Arc<dyn HealthProbe>, config: &SyncConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Offline);

        ConnectivityMonitor {
            state_tx,
            probe,
            failure_threshold: config.connectivity.failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            interval: config.connectivity.health_interval(),
        }
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    fn transition(&self, next: ConnectivityState, reason: &str) {
        let mut previous = next;
        let changed = self.state_tx.send_if_modified(|state| {
            previous = *state;
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });

        if changed {
            info!(from = %previous, to = %next, reason, "Connectivity changed");
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// The platform reports a usable network. Probes before going online.
    pub async fn network_available(&self) {
        if self.state() == ConnectivityState::Offline {
            self.transition(ConnectivityState::Checking, "network available");
        }
        self.check_now().await;
    }

    /// The platform reports no network. Takes effect immediately.
    pub fn network_unavailable(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.transition(ConnectivityState::Offline, "network unavailable");
    }

    /// A send failed at the transport level while we believed we were online.
    pub async fn suspect(&self) {
        if self.state() == ConnectivityState::Online {
            self.transition(ConnectivityState::Checking, "send failed");
        }
        self.check_now().await;
    }

    /// Runs one health probe and applies its result.
    pub async fn check_now(&self) -> ConnectivityState {
        let epoch = self.epoch.load(Ordering::Acquire);
        let healthy = self.probe.probe().await;

        if self.epoch.load(Ordering::Acquire) != epoch {
            debug!("Discarding probe result overtaken by network loss");
            return self.state();
        }

        if healthy {
            self.consecutive_failures.store(0, Ordering::Release);
            self.transition(ConnectivityState::Online, "probe succeeded");
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
            match self.state() {
                ConnectivityState::Online if failures < self.failure_threshold => {
                    debug!(failures, threshold = self.failure_threshold, "Health probe failed");
                }
                ConnectivityState::Offline => {}
                _ => self.transition(ConnectivityState::Offline, "probe failed"),
            }
        }

        self.state()
    }

    // =========================================================================
    // Periodic Probe
    // =========================================================================

    /// Probes every health interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "Connectivity monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_now().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Connectivity monitor stopped");
    }
}
