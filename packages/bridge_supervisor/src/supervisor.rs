use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeActor, BridgeConfig, BridgeHandle};
use crate::error::SupervisorError;
use crate::ports::PortAllocator;

/// Unique identifier for a supervised bridge
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct BridgeId(pub u64);

impl std::fmt::Display for BridgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bridge-{}", self.0)
    }
}

/// Spawns and tracks bridge processes, each on its own loopback port
pub struct BridgeSupervisor {
    ports: PortAllocator,
    bridges: RwLock<HashMap<BridgeId, BridgeHandle>>,
    next_id: AtomicU64,
}

impl BridgeSupervisor {
    /// Create a supervisor that hands out ports starting at `base_port`
    pub fn new(base_port: u16) -> Self {
        Self {
            ports: PortAllocator::new(base_port),
            bridges: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a port and start a bridge on it.
    ///
    /// Bridges that have already exited stop being tracked here.
    /// `build` receives the freshly allocated port and returns the command to
    /// run. The port is consumed even if the spawn fails.
    pub async fn spawn<F>(&self, build: F) -> Result<(BridgeId, BridgeHandle), SupervisorError>
    where
        F: FnOnce(u16) -> BridgeConfig,
    {
        let port = self.ports.next()?;
        let config = build(port);
        let id = BridgeId(self.next_id.fetch_add(1, Ordering::SeqCst));

        debug!("Spawning {} on port {}: {}", id, port, config.program);

        let handle = BridgeActor::spawn(config, port)?;

        info!("{} started on port {} (pid={:?})", id, port, handle.pid());

        let mut bridges = self.bridges.write().await;
        let before = bridges.len();
        bridges.retain(|_, h| h.is_alive());
        if bridges.len() < before {
            debug!("Pruned {} exited bridges", before - bridges.len());
        }
        bridges.insert(id, handle.clone());

        Ok((id, handle))
    }

    /// Get a handle to a tracked bridge
    pub async fn get(&self, id: BridgeId) -> Option<BridgeHandle> {
        self.bridges.read().await.get(&id).cloned()
    }

    /// Send a termination signal to one bridge. Does not wait for exit.
    pub async fn terminate(&self, id: BridgeId) -> Result<(), SupervisorError> {
        let handle = self
            .get(id)
            .await
            .ok_or(SupervisorError::NotFound(id.0))?;
        handle.terminate().await
    }

    /// Best-effort termination of every bridge still running.
    ///
    /// Returns how many bridges were signalled.
    pub async fn kill_all(&self) -> usize {
        let bridges: Vec<(BridgeId, BridgeHandle)> = self
            .bridges
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut signalled = 0;
        for (id, handle) in bridges.iter().filter(|(_, h)| h.is_alive()) {
            match handle.terminate().await {
                Ok(()) => signalled += 1,
                Err(e) => warn!("Failed to terminate {}: {}", id, e),
            }
        }
        signalled
    }

    /// List tracked bridge IDs. Exited bridges stay listed until the next spawn.
    pub async fn list(&self) -> Vec<BridgeId> {
        let mut ids: Vec<BridgeId> = self.bridges.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of tracked bridges that have not reported exit
    pub async fn alive_count(&self) -> usize {
        self.bridges
            .read()
            .await
            .values()
            .filter(|h| h.is_alive())
            .count()
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }
}
