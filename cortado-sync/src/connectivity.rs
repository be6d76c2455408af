//! Connectivity state and the sync trigger.
//!
//! The engine never probes the network itself; it asks a
//! [`ConnectivityProbe`]. The default implementation is a watch channel
//! the host flips from its platform hooks (browser events, NetworkMonitor,
//! a heartbeat task). [`ConnectivityTrigger`] turns offline→online
//! transitions and a periodic timer into sync cycles.

use crate::engine::SyncEngine;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Answers "are we online right now".
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Shared online/offline flag, fed by the host platform.
#[derive(Clone)]
pub struct OnlineState {
    tx: watch::Sender<bool>,
}

impl OnlineState {
    /// Starts in the given state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Records a connectivity change. Redundant sets are harmless.
    pub fn set_online(&self, online: bool) {
        if self.tx.send_replace(online) != online {
            info!(online, "connectivity changed");
        }
    }

    /// Current state without waiting.
    #[must_use]
    pub fn online(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver that observes every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// A probe view of this state.
    #[must_use]
    pub fn probe(&self) -> OnlineProbe {
        OnlineProbe { rx: self.tx.subscribe() }
    }
}

impl Default for OnlineState {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Probe backed by an [`OnlineState`].
#[derive(Clone)]
pub struct OnlineProbe {
    rx: watch::Receiver<bool>,
}

#[async_trait]
impl ConnectivityProbe for OnlineProbe {
    async fn is_online(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Background task that runs sync cycles on reconnect and on a timer.
pub struct ConnectivityTrigger;

impl ConnectivityTrigger {
    /// Spawns the trigger task.
    ///
    /// A cycle runs when connectivity flips from offline to online, and
    /// every `period` regardless, to pick up actions whose backoff expired.
    /// The task ends when the transition sender is dropped.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        mut transitions: watch::Receiver<bool>,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; swallow it so startup does
            // not race the host's own initial sync.
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = transitions.changed() => {
                        if changed.is_err() {
                            debug!("connectivity source dropped, trigger task exiting");
                            return;
                        }
                        let online = *transitions.borrow_and_update();
                        if !online {
                            continue;
                        }
                        info!("back online, starting sync cycle");
                        if let Err(e) = engine.sync().await {
                            warn!(error = %e, "reconnect sync cycle failed");
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = engine.sync().await {
                            warn!(error = %e, "periodic sync cycle failed");
                        }
                    }
                }
            }
        })
    }
}
