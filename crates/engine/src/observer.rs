//! Connectivity-driven pause/resume.
//!
//! The host reports its view of the network (online/offline, page or
//! window visibility) through a watch channel; the observer translates
//! availability transitions into queue-wide pause and resume so
//! individual sessions never poll connectivity themselves.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::EngineShared;
use crate::UploadEngine;

/// Host-reported connectivity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkState {
    pub online: bool,
    pub visible: bool,
}

impl NetworkState {
    /// Uploads run only while the network is reachable and the app is
    /// foregrounded.
    pub fn available(&self) -> bool {
        self.online && self.visible
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            online: true,
            visible: true,
        }
    }
}

/// Background task pausing and resuming the whole queue on connectivity
/// transitions. Dropped-and-restored availability results in exactly one
/// pause and one resume, not one per state update.
pub struct NetworkObserver {
    shutdown: CancellationToken,
}

impl NetworkObserver {
    pub fn spawn(engine: &UploadEngine, mut states: watch::Receiver<NetworkState>) -> Self {
        let shared: Arc<EngineShared> = engine.shared_arc();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            let mut available = states.borrow().available();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let now = states.borrow_and_update().available();
                if now == available {
                    debug!(online = states.borrow().online, "network state changed; availability unchanged");
                    continue;
                }
                available = now;
                if available {
                    info!("connectivity restored; resuming uploads");
                    shared.resume_all();
                } else {
                    info!("connectivity lost; pausing uploads");
                    shared.pause_all();
                }
            }
        });
        Self { shutdown }
    }

    /// Stops the observer task. The queue keeps its current state.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for NetworkObserver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
